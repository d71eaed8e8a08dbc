//! HTTP surface and transport lifecycle.
//!
//! Two routes, both `POST` with a JSON body:
//!
//! | Path         | Body                       | Success | Failure                  |
//! |--------------|----------------------------|---------|--------------------------|
//! | `/message`   | `MessageWrapper`           | 200     | 401 auth, 500 local      |
//! | `/bootstrap` | `StartConversationWrapper` | 200     | 401 auth, 500 local      |
//!
//! Every authentication-related failure collapses to a bare 401 so a peer
//! cannot tell which check rejected it.
//!
//! A [`Server`] runs create → serve → close, either behind an onion service
//! (production) or on a plain TCP bind (local testing).

use crate::config::{HttpConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::registry::{RouteHandler, BOOTSTRAP_PATH, MESSAGE_PATH};
use crate::tor::{self, OnionService};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};

/// Build the router for `handler`.
pub fn router(handler: Arc<RouteHandler>, body_limit: usize) -> Router {
    Router::new()
        .route(&format!("/{}", MESSAGE_PATH), post(message))
        .route(&format!("/{}", BOOTSTRAP_PATH), post(bootstrap))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(handler)
}

async fn message(State(handler): State<Arc<RouteHandler>>, body: Bytes) -> StatusCode {
    respond(MESSAGE_PATH, handler.handle_message(&body).await)
}

async fn bootstrap(State(handler): State<Arc<RouteHandler>>, body: Bytes) -> StatusCode {
    respond(BOOTSTRAP_PATH, handler.handle_bootstrap(&body).await)
}

fn respond(route: &str, result: Result<()>) -> StatusCode {
    match result {
        Ok(()) => StatusCode::OK,
        Err(e) if e.is_unauthorized() => {
            debug!(route, error = ?e, "Rejected request");
            StatusCode::UNAUTHORIZED
        }
        Err(e) => {
            warn!(route, error = ?e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// A running listener plus its route handler.
pub struct Server {
    handler: Arc<RouteHandler>,
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    onion: Option<OnionService>,
}

impl Server {
    /// Register an onion service and serve behind it. Outbound requests go
    /// through Tor's SOCKS proxy.
    pub async fn start(config: &ServerConfig) -> Result<Self> {
        let (onion, listener) = OnionService::start(&config.tor, &config.onion).await?;
        let client = tor::proxied_client(&config.tor, config.http.send_timeout)?;
        let handler = Arc::new(RouteHandler::new(onion.address().as_str(), client));

        Self::serve(listener, handler, config.http.body_limit, Some(onion))
    }

    /// Serve on a plain TCP address without Tor. The handler's address is
    /// the bound `host:port`.
    pub async fn bind_direct(addr: SocketAddr, config: &HttpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let client = tor::direct_client(config.send_timeout)?;
        let handler = Arc::new(RouteHandler::new(local_addr.to_string(), client));

        warn!(%local_addr, "Serving without Tor; for local testing only");
        Self::serve(listener, handler, config.body_limit, None)
    }

    fn serve(
        listener: TcpListener,
        handler: Arc<RouteHandler>,
        body_limit: usize,
        onion: Option<OnionService>,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let app = router(handler.clone(), body_limit);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "HTTP server stopped");
            }
        });

        info!(%local_addr, "Listening");

        Ok(Self {
            handler,
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
            onion,
        })
    }

    /// The route handler behind this server.
    pub fn handler(&self) -> Arc<RouteHandler> {
        self.handler.clone()
    }

    /// The address peers reach us on.
    pub fn address(&self) -> &str {
        self.handler.address()
    }

    /// The local socket the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send final messages, stop listening and remove the onion service.
    pub async fn shutdown(mut self) -> Result<()> {
        self.handler.close().await;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| Error::Io(format!("server task failed: {}", e)))?;

        if let Some(onion) = self.onion.take() {
            onion.stop().await?;
        }

        info!("Server shut down");
        Ok(())
    }
}
