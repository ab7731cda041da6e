//! Command-line client for a remote store
//!
//! The client checks the store and credential once when it connects, then
//! issues one GET or PUT per call. Calls use a short timeout and are never
//! retried.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

/// Text the store answers with when a request names no key
const READY_MARKER: &str = "missing key";

/// Errors returned by client operations
#[derive(Error, Debug)]
pub enum ClientError {
  #[error("invalid store url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("invalid store submitted: {0}")]
  UnsupportedScheme(String),

  #[error("unable to build http client: {0}")]
  Build(#[source] reqwest::Error),

  #[error("cannot reach store endpoint {store}")]
  Unreachable {
    store: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("invalid credential for store {store}")]
  InvalidCredential { store: String },

  #[error("invalid response from store: {0}")]
  InvalidResponse(String),

  #[error("request to store failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("not in store")]
  NotInStore,

  #[error("response from store not OK: {0}")]
  NotOk(String),

  #[error("unable to set key value in store")]
  UnableToSet,
}

/// Client bound to a validated store URL
#[derive(Debug, Clone)]
pub struct Client {
  /// Store URL, including the `cred` query parameter
  store: Url,
  http: reqwest::Client,
}

impl Client {
  /// Parse `store`, attach `cred` and check the store with a keyless GET
  ///
  /// `timeout` applies to this check and to every later call.
  pub async fn connect(
    store: &str,
    cred: &str,
    timeout: Duration,
  ) -> Result<Self, ClientError> {
    let url = with_cred(Url::parse(store)?, cred);
    if !matches!(url.scheme(), "http" | "https") {
      return Err(ClientError::UnsupportedScheme(store.to_string()));
    }

    let mut builder = reqwest::Client::builder().timeout(timeout);
    if is_loopback(&url) {
      // Proxies from the environment never apply to a local store.
      builder = builder.no_proxy();
    }
    let http = builder.build().map_err(ClientError::Build)?;

    let response = http
      .get(url.clone())
      .send()
      .await
      .map_err(|source| ClientError::Unreachable {
        store: store.to_string(),
        source,
      })?;

    if response.status() == StatusCode::UNAUTHORIZED {
      return Err(ClientError::InvalidCredential {
        store: store.to_string(),
      });
    }

    let body = response
      .text()
      .await
      .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
    if !body.contains(READY_MARKER) {
      return Err(ClientError::InvalidResponse(body.trim_end().to_string()));
    }

    debug!(store = %store, "Connected to store");
    Ok(Self { store: url, http })
  }

  /// Fetch the value of `key`
  pub async fn get(&self, key: &str) -> Result<String, ClientError> {
    let response = self.http.get(self.url_with(&[("k", key)])).send().await?;

    match response.status() {
      StatusCode::OK => Ok(response.text().await?),
      StatusCode::NOT_FOUND => Err(ClientError::NotInStore),
      status => Err(ClientError::NotOk(status_text(status))),
    }
  }

  /// Set `key` to `value`, checking the store echoed both back
  pub async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
    let response = self
      .http
      .put(self.url_with(&[("k", key), ("v", value)]))
      .send()
      .await?;

    let status = response.status();
    if status != StatusCode::OK {
      return Err(ClientError::NotOk(status_text(status)));
    }

    let body = response.text().await?;
    if body != format!("{}: {}", key, value) {
      debug!(body = %body, "Unexpected set response");
      return Err(ClientError::UnableToSet);
    }
    Ok(())
  }

  fn url_with(&self, params: &[(&str, &str)]) -> Url {
    let mut url = self.store.clone();
    url.query_pairs_mut().extend_pairs(params);
    url
  }
}

/// Replace any `cred` already in the query with `cred`
fn with_cred(mut url: Url, cred: &str) -> Url {
  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(name, _)| *name != "cred")
    .map(|(name, value)| (name.into_owned(), value.into_owned()))
    .collect();

  url
    .query_pairs_mut()
    .clear()
    .extend_pairs(kept)
    .append_pair("cred", cred);
  url
}

fn is_loopback(url: &Url) -> bool {
  match url.host() {
    Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
    Some(Host::Ipv4(ip)) => ip.is_loopback(),
    Some(Host::Ipv6(ip)) => ip.is_loopback(),
    None => false,
  }
}

fn status_text(status: StatusCode) -> String {
  status
    .canonical_reason()
    .unwrap_or(status.as_str())
    .to_string()
}
