//! HTTP front end of the key-value store

mod error;
pub mod handler;

use axum::Router;
use axum::http::StatusCode;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;

pub use handler::AppState;

/// Build the router
///
/// Every path and method reaches the same handler, which decides what is
/// valid.
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
  Router::new()
    .fallback(handler::handle)
    .layer(RequestBodyTimeoutLayer::new(config.read_timeout()))
    .layer(TimeoutLayer::with_status_code(
      StatusCode::REQUEST_TIMEOUT,
      config.write_timeout(),
    ))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// HTTP server
pub struct Server {
  listener: TcpListener,
  local_addr: SocketAddr,
  router: Router,
  http: http1::Builder,
}

impl Server {
  /// Bind the listener described by `config`
  pub async fn bind(config: &ServerConfig, state: Arc<AppState>) -> std::io::Result<Self> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    info!("HTTP server bound to {}", local_addr);

    // Connections that do not finish sending headers in time are closed.
    let mut http = http1::Builder::new();
    http
      .timer(TokioTimer::new())
      .header_read_timeout(config.read_timeout());

    Ok(Self {
      listener,
      local_addr,
      router: create_router(state, config),
      http,
    })
  }

  /// Get local listening address
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Serve requests until Ctrl-C
  pub async fn run(self) -> std::io::Result<()> {
    self.run_until(shutdown_signal()).await
  }

  /// Serve requests until `shutdown` completes, then drain open connections
  pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    info!("Server started, listening on {}", self.local_addr);

    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        accepted = self.listener.accept() => match accepted {
          Ok((stream, peer_addr)) => self.serve_connection(stream, peer_addr, &graceful),
          Err(e) => error!("Failed to accept connection: {}", e),
        },
        _ = &mut shutdown => break,
      }
    }

    info!("Draining open connections");
    graceful.shutdown().await;
    info!("Server stopped");
    Ok(())
  }

  /// Spawn an independent task for one connection
  fn serve_connection(&self, stream: TcpStream, peer_addr: SocketAddr, graceful: &GracefulShutdown) {
    debug!("New connection accepted from {}", peer_addr);

    let service = TowerToHyperService::new(self.router.clone());
    let conn = self.http.serve_connection(TokioIo::new(stream), service);
    let conn = graceful.watch(conn);

    tokio::spawn(async move {
      if let Err(e) = conn.await {
        debug!("Connection from {} ended with error: {}", peer_addr, e);
      }
    });
  }
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("Received Ctrl-C, shutting down"),
    Err(e) => {
      warn!("Failed to listen for Ctrl-C: {}", e);
      std::future::pending::<()>().await
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::creds::CredentialSet;
  use crate::store::MemoryStore;
  use std::time::{Duration, Instant};
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::sync::oneshot;

  async fn spawn_server(config: ServerConfig) -> SocketAddr {
    let creds = CredentialSet::new(["testcredential"]).unwrap();
    let state = Arc::new(AppState::new(Arc::new(MemoryStore::new()), creds));
    let server = Server::bind(&config, state).await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run_until(std::future::pending()));
    addr
  }

  fn short_timeouts() -> ServerConfig {
    ServerConfig {
      listen: "127.0.0.1:0".to_string(),
      read_timeout_secs: 1,
      write_timeout_secs: 2,
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn test_bind_and_shutdown() {
    let config = ServerConfig {
      listen: "127.0.0.1:0".to_string(),
      ..Default::default()
    };
    let creds = CredentialSet::new(["testcredential"]).unwrap();
    let state = Arc::new(AppState::new(Arc::new(MemoryStore::new()), creds));

    let server = Server::bind(&config, state).await.unwrap();
    assert_ne!(server.local_addr().port(), 0);

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
      let _ = rx.await;
    }));

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_complete_request_over_tcp() {
    let addr = spawn_server(short_timeouts()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
      .write_all(b"PUT /?cred=testcredential&k=a&v=b HTTP/1.1\r\nHost: kv\r\nConnection: close\r\n\r\n")
      .await
      .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
    assert!(response.ends_with("a: b"), "{}", response);
  }

  #[tokio::test]
  async fn test_slow_headers_are_cut_off() {
    let addr = spawn_server(short_timeouts()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
      .write_all(b"GET /?cred=testcredential&k=a HTTP/1.1\r\n")
      .await
      .unwrap();

    let started = Instant::now();
    let mut buf = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
    assert!(closed.is_ok(), "connection still open after {:?}", started.elapsed());
    assert!(started.elapsed() >= Duration::from_millis(900));
  }

  #[tokio::test]
  async fn test_slow_form_body_is_cut_off() {
    let addr = spawn_server(short_timeouts()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
      .write_all(
        b"PUT /?cred=testcredential&k=a HTTP/1.1\r\nHost: kv\r\n\
          Content-Type: application/x-www-form-urlencoded\r\nContent-Length: 100\r\n\r\nv=b",
      )
      .await
      .unwrap();

    let started = Instant::now();
    let mut buf = [0u8; 1024];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
      .await
      .expect("no response before the read timeout fired")
      .unwrap();
    let response = String::from_utf8_lossy(&buf[..read]);
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
    assert!(started.elapsed() >= Duration::from_millis(900));
  }
}
