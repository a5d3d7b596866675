use crate::config::Config;
use crate::handlers::{echo_handler, health_handler, hello_handler, info_handler, not_found_handler};
use crate::middleware;
use anyhow::{Context, Result};
use axum::{
    extract::ConnectInfo,
    http::Request,
    routing::{get, post},
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Time allowed for in-flight requests once shutdown starts
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Pause after a failed `accept`, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

/// Server lifecycle: `Starting → Serving → ShuttingDown → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Serving,
    ShuttingDown,
    Stopped,
}

/// How shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight requests finished within the grace period
    Graceful,
    /// The grace period expired and open connections were closed
    TimedOut,
}

/// Routes without middleware
pub fn routes(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/info", get(info_handler))
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", v1)
        .fallback(not_found_handler)
        .with_state(state)
}

/// Build the complete application: routes plus middleware
pub fn build_app(config: &Config) -> Router {
    let state = Arc::new(AppState::new(config.clone()));

    debug!("Setting up API routes");
    let app = middleware::apply(routes(state), &config.server);

    if !config.is_release() {
        info!("Routes configured:");
        info!("  GET  /health        - Health check");
        info!("  GET  /api/v1/info   - Application information");
        info!("  GET  /api/v1/hello  - Greeting (?name=)");
        info!("  POST /api/v1/echo   - Echo a message");
    }

    app
}

/// A server accepting connections on a background task
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    force_close: CancellationToken,
    handle: JoinHandle<()>,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
}

/// Bind the configured address and start serving `app` in the background.
pub async fn serve(config: &Config, app: Router) -> Result<RunningServer> {
    let (lifecycle, _) = watch::channel(Lifecycle::Starting);
    let lifecycle = Arc::new(lifecycle);

    let addr = config.server.address();
    debug!(address = %addr, "Binding TCP listener");

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %addr, error = %e, "Failed to bind to address");
            return Err(e).with_context(|| format!("failed to bind {}", addr));
        }
    };
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let force_close = CancellationToken::new();
    let task_lifecycle = Arc::clone(&lifecycle);

    let handle = tokio::spawn(accept_loop(
        listener,
        app,
        shutdown.clone(),
        force_close.clone(),
        task_lifecycle,
    ));

    lifecycle.send_replace(Lifecycle::Serving);
    info!(address = %local_addr, "Server is now accepting connections");

    Ok(RunningServer {
        local_addr,
        shutdown,
        force_close,
        handle,
        lifecycle,
    })
}

/// Accept connections until `shutdown` fires, then drain the open ones.
///
/// Every connection task lives in this loop's `JoinSet`, so the serving task
/// finishes only once all of them have ended.
async fn accept_loop(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    force_close: CancellationToken,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "Connection accepted");
                    connections.spawn(serve_connection(
                        socket,
                        peer,
                        app.clone(),
                        shutdown.clone(),
                        force_close.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    debug!(open = connections.len(), "Stopped accepting, draining connections");
    while connections.join_next().await.is_some() {}

    lifecycle.send_replace(Lifecycle::Stopped);
}

/// Serve one connection. `shutdown` asks it to finish the in-flight request
/// and close; `force_close` drops it immediately.
async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
    force_close: CancellationToken,
) {
    let service = ServiceExt::<Request<Incoming>>::map_request(
        app,
        move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ConnectInfo(peer));
            req
        },
    );
    let service = TowerToHyperService::new(service);

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(socket), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%peer, error = %e, "Connection ended with error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
            _ = force_close.cancelled() => {
                warn!(%peer, "Closing connection with a request still in flight");
                break;
            }
        }
    }
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Subscribe to lifecycle transitions
    pub fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Stop accepting connections and wait up to `grace` for in-flight
    /// requests. Connections still open when the grace period expires are
    /// closed before this returns.
    pub async fn shutdown(self, grace: Duration) -> ShutdownOutcome {
        let RunningServer {
            shutdown,
            force_close,
            mut handle,
            lifecycle,
            ..
        } = self;

        lifecycle.send_replace(Lifecycle::ShuttingDown);
        shutdown.cancel();

        let outcome = match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => ShutdownOutcome::Graceful,
            Ok(Err(e)) => {
                error!(error = %e, "Server task failed");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                force_close.cancel();
                if let Err(e) = handle.await {
                    error!(error = %e, "Server task failed while closing connections");
                }
                ShutdownOutcome::TimedOut
            }
        };

        lifecycle.send_replace(Lifecycle::Stopped);
        outcome
    }
}

/// Resolve on Ctrl+C, or on SIGTERM where the platform has it.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                debug!("Registered SIGTERM handler");
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Start the web server and run it until a termination signal arrives
pub async fn start_server(config: Config) -> Result<()> {
    let app = build_app(&config);
    run_until(&config, app, shutdown_signal(), GRACE_PERIOD).await?;
    Ok(())
}

/// Serve `app` until `signal` resolves, then shut down within `grace`.
/// A timed-out shutdown is logged, not returned as an error.
pub async fn run_until<F>(
    config: &Config,
    app: Router,
    signal: F,
    grace: Duration,
) -> Result<ShutdownOutcome>
where
    F: Future<Output = ()>,
{
    let server = serve(config, app).await?;
    let local_addr = server.local_addr();

    info!("🚀 {} started", config.app.name);
    info!("📍 Address: http://{}", local_addr);
    info!("🔗 Health check: http://{}/health", local_addr);
    info!("🛠️ Mode: {}", config.server.mode);
    info!("Press Ctrl+C to stop the server");

    signal.await;

    let outcome = server.shutdown(grace).await;
    match outcome {
        ShutdownOutcome::Graceful => info!("Server stopped gracefully"),
        ShutdownOutcome::TimedOut => warn!(
            grace_ms = grace.as_millis() as u64,
            "Grace period expired, forcing shutdown"
        ),
    }

    Ok(outcome)
}
