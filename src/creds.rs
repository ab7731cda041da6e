//! Shared-secret credentials loaded once at startup

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

/// Errors that can occur while loading a credentials file
#[derive(Error, Debug)]
pub enum CredsError {
  #[error("unable to read {path} for client credentials")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("unable to parse {path} into creds")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("no creds found in {path}")]
  Empty { path: String },
}

/// Trimmed, deduplicated set of valid credentials, immutable after load
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialSet {
  creds: HashSet<String>,
}

impl CredentialSet {
  /// Build a set from raw entries, dropping blank ones
  ///
  /// Returns `None` when nothing is left after trimming.
  pub fn new<I, S>(entries: I) -> Option<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let creds: HashSet<String> = entries
      .into_iter()
      .map(|c| c.as_ref().trim().to_string())
      .filter(|c| !c.is_empty())
      .collect();

    if creds.is_empty() {
      None
    } else {
      Some(Self { creds })
    }
  }

  /// Load credentials from a file holding a JSON array of strings
  pub fn load(path: impl AsRef<Path>) -> Result<Self, CredsError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let data = fs::read_to_string(path).map_err(|source| CredsError::Read {
      path: display.clone(),
      source,
    })?;

    let entries: Vec<String> =
      serde_json::from_str(&data).map_err(|source| CredsError::Parse {
        path: display.clone(),
        source,
      })?;

    Self::new(entries).ok_or(CredsError::Empty { path: display })
  }

  /// Check whether `cred` (trimmed) is a valid credential
  pub fn contains(&self, cred: &str) -> bool {
    self.creds.contains(cred.trim())
  }

  /// Number of distinct credentials
  pub fn len(&self) -> usize {
    self.creds.len()
  }
}
