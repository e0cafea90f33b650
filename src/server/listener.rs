//! Server listener
//!
//! Binds the TCP port, serves the WebSocket endpoint and the admin
//! routes, and owns the background tasks: the dispatcher loop and the
//! liveness/rebalance timers.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::error::{Error, Result};
use crate::server::admin;
use crate::server::config::ServerConfig;
use crate::server::connection;

/// Shared state for the axum handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command handle to the single-writer loop
    pub dispatcher: DispatcherHandle,
    /// Per-connection outbound queue length
    pub outbound_queue: usize,
    /// Participant cap; `None` means unlimited
    pub connection_permits: Option<Arc<Semaphore>>,
}

/// Coordination server for the broadcast fabric
pub struct TreecastServer {
    config: ServerConfig,
}

impl TreecastServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server fails or is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// Serves until the `shutdown` future completes, then stops the accept
    /// loop and aborts the background tasks.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (dispatcher, handle) = Dispatcher::new(
            self.config.capacity(),
            self.config.heartbeat_timeout,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run());
        let sweep_task = spawn_ticker(handle.clone(), self.config.sweep_interval, Tick::Sweep);
        let rebalance_task = spawn_ticker(
            handle.clone(),
            self.config.rebalance_interval,
            Tick::Rebalance,
        );

        let state = Arc::new(AppState {
            dispatcher: handle,
            outbound_queue: self.config.outbound_queue,
            connection_permits: match self.config.max_participants {
                0 => None,
                n => Some(Arc::new(Semaphore::new(n))),
            },
        });

        let router = Router::new()
            .route("/", get(admin::index))
            .route("/admin/rooms", get(admin::rooms))
            .route("/ws", get(ws_upgrade))
            .with_state(state);

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(Error::Bind)?;
        tracing::info!(addr = %self.config.bind_addr, "treecast server listening");

        let result = tokio::select! {
            () = shutdown => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
            served = axum::serve(listener, router).into_future() => served.map_err(Error::Serve),
        };

        sweep_task.abort();
        rebalance_task.abort();
        dispatcher_task.abort();

        result
    }
}

/// Which periodic job a ticker task drives
enum Tick {
    Sweep,
    Rebalance,
}

/// Spawn a timer task posting tick commands to the dispatcher
fn spawn_ticker(
    handle: DispatcherHandle,
    period: std::time::Duration,
    tick: Tick,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick of `interval` fires immediately; skip it so a
        // fresh server does not sweep before anyone could heartbeat.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tick {
                Tick::Sweep => handle.sweep_tick(),
                Tick::Rebalance => handle.rebalance_tick(),
            }
        }
    })
}

/// Handler for `GET /ws`: upgrade to the participant transport
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Enforce the participant cap before upgrading.
    let permit = match &state.connection_permits {
        Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("connection rejected: participant limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let dispatcher = state.dispatcher.clone();
    let outbound_queue = state.outbound_queue;
    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        connection::run(socket, dispatcher, outbound_queue).await;
    })
    .into_response()
}
