//! Request validation and dispatch to the store

use axum::{
  body::{Body, to_bytes},
  extract::State,
  http::{HeaderMap, Method, Uri, header::CONTENT_TYPE},
};
use percent_encoding::percent_decode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::ApiError;
use crate::creds::CredentialSet;
use crate::store::KvStore;

/// Shared state handed to every request
pub struct AppState {
  pub store: Arc<dyn KvStore>,
  pub creds: CredentialSet,
}

impl AppState {
  pub fn new(store: Arc<dyn KvStore>, creds: CredentialSet) -> Self {
    Self { store, creds }
  }
}

/// Largest form body read for PUT, POST and PATCH
const MAX_FORM_BODY: usize = 10 << 20;

/// Request parameters understood by the store endpoint
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreQuery {
  pub cred: Option<String>,
  pub key: Option<String>,
  pub value: Option<String>,
}

impl StoreQuery {
  /// Decode `application/x-www-form-urlencoded` text
  ///
  /// The first occurrence of each parameter wins. Pairs with a malformed
  /// percent escape are skipped. A decoded name or value that is not
  /// UTF-8 rejects the whole request.
  pub fn parse(raw: &str) -> Result<Self, ApiError> {
    let mut query = Self::default();

    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
      let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
      if !has_valid_escapes(name) || !has_valid_escapes(value) {
        debug!(pair = %pair, "Skipping malformed query pair");
        continue;
      }

      let slot = match decode_component(name)?.as_str() {
        "cred" => &mut query.cred,
        "k" => &mut query.key,
        "v" => &mut query.value,
        _ => continue,
      };
      if slot.is_none() {
        *slot = Some(decode_component(value)?);
      }
    }
    Ok(query)
  }

  /// Fill parameters missing here from `other`
  pub fn or(self, other: StoreQuery) -> Self {
    Self {
      cred: self.cred.or(other.cred),
      key: self.key.or(other.key),
      value: self.value.or(other.value),
    }
  }
}

fn has_valid_escapes(raw: &str) -> bool {
  let bytes = raw.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'%' {
      i += 1;
      continue;
    }
    match bytes.get(i + 1..i + 3) {
      Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
      _ => return false,
    }
  }
  true
}

fn decode_component(raw: &str) -> Result<String, ApiError> {
  let spaced: Vec<u8> = raw
    .bytes()
    .map(|b| if b == b'+' { b' ' } else { b })
    .collect();
  let decoded: Vec<u8> = percent_decode(&spaced).collect();
  String::from_utf8(decoded).map_err(|_| ApiError::InvalidEncoding)
}

fn is_form(headers: &HeaderMap) -> bool {
  headers
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.split(';').next())
    .is_some_and(|mime| {
      mime
        .trim()
        .eq_ignore_ascii_case("application/x-www-form-urlencoded")
    })
}

/// Collect request parameters
///
/// PUT, POST and PATCH requests with a form body have their body decoded
/// too, and body values take precedence over query values.
async fn parameters(
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  body: Body,
) -> Result<StoreQuery, ApiError> {
  let query = StoreQuery::parse(uri.query().unwrap_or(""))?;

  let reads_body = matches!(*method, Method::PUT | Method::POST | Method::PATCH);
  if !reads_body || !is_form(headers) {
    return Ok(query);
  }

  let bytes = to_bytes(body, MAX_FORM_BODY).await.map_err(|e| {
    warn!(error = %e, "Failed to read form body");
    ApiError::InvalidRequest
  })?;
  let text = std::str::from_utf8(&bytes).map_err(|_| ApiError::InvalidEncoding)?;
  Ok(StoreQuery::parse(text)?.or(query))
}

/// Handle every request sent to the server
///
/// Checks run in a fixed order and the first failure answers the request:
/// path, credential, key presence, method, then the store operation.
/// A request without a credential is a ping and gets an empty 200.
pub async fn handle(
  State(state): State<Arc<AppState>>,
  method: Method,
  uri: Uri,
  headers: HeaderMap,
  body: Body,
) -> Result<String, ApiError> {
  if uri.path() != "/" {
    return Err(ApiError::InvalidRequest);
  }

  let query = parameters(&method, &uri, &headers, body).await?;

  let cred = match query.cred.as_deref() {
    None | Some("") => return Ok(String::new()),
    Some(cred) => cred,
  };
  if !state.creds.contains(cred) {
    return Err(ApiError::InvalidCred);
  }

  let key = match query.key {
    Some(key) if !key.is_empty() => key,
    _ => return Err(ApiError::MissingKey),
  };

  match method {
    Method::GET => get(&state, &key).await,
    Method::PUT => put(&state, &key, query.value.unwrap_or_default()).await,
    _ => Err(ApiError::InvalidMethod),
  }
}

async fn get(state: &AppState, key: &str) -> Result<String, ApiError> {
  match state.store.get(key).await? {
    Some(value) => {
      debug!(key = %key, "Key found");
      Ok(value)
    }
    None => {
      debug!(key = %key, "Key not found");
      Err(ApiError::NoSuchKey)
    }
  }
}

async fn put(state: &AppState, key: &str, value: String) -> Result<String, ApiError> {
  let key = key.trim();
  if key.is_empty() {
    return Err(ApiError::EmptyKey);
  }

  let body = format!("{}: {}", key, value);
  state.store.set(key.to_string(), value).await?;
  info!(key = %key, "Key set");
  Ok(body)
}
