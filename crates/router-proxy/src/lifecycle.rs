use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use router_registry::Registry;

use crate::dispatcher::Dispatcher;
use crate::diagnostics::Diagnostics;
use crate::error::ProxyError;
use crate::varz::SharedVarz;

/// Runs the accept loop, the diagnostic listener, and the shutdown
/// sequence, matching the original router's `Run`/`Drain`/`Stop` contract.
pub struct Lifecycle {
    dispatcher: Arc<Dispatcher>,
    diagnostics: Option<Diagnostics>,
    accept_cancel: Option<watch::Sender<bool>>,
    stopping: Arc<AtomicBool>,
    started_at: Instant,
}

impl Lifecycle {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            diagnostics: None,
            accept_cancel: None,
            stopping: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    /// Opens the listener and starts serving. Returns a channel that
    /// receives the first terminal error encountered while accepting
    /// connections.
    pub async fn run(&mut self, port: u16) -> Result<mpsc::Receiver<ProxyError>, ProxyError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(addr).await.map_err(ProxyError::Listen)?;
        info!(%addr, "listening");

        let (err_tx, err_rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.accept_cancel = Some(cancel_tx);

        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, _peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(%err, "accept failed");
                                continue;
                            }
                        };
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let dispatcher = dispatcher.clone();
                                async move { Ok::<_, std::convert::Infallible>(dispatcher.dispatch(req).await) }
                            });
                            if let Err(err) = ConnBuilder::new(TokioExecutor::new())
                                .serve_connection(io, service)
                                .await
                            {
                                warn!(%err, "connection error");
                            }
                        });
                    }
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            let _ = err_tx.send(ProxyError::Serve(std::io::Error::new(
                                std::io::ErrorKind::Other,
                                "listener closed",
                            ))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(err_rx)
    }

    pub async fn start_diagnostics(
        &mut self,
        bind_addr: SocketAddr,
        registry: Arc<Registry>,
        varz: SharedVarz,
        user: String,
        pass: String,
    ) -> Result<(), std::io::Error> {
        let diagnostics =
            Diagnostics::start(bind_addr, registry, varz, self.started_at, user, pass).await?;
        self.diagnostics = Some(diagnostics);
        Ok(())
    }

    /// Stops accepting new connections, then waits for in-flight requests
    /// to drain, up to `timeout`.
    pub async fn drain(&mut self, timeout: Duration) -> Result<(), ProxyError> {
        self.close_listener();

        let deadline = Instant::now() + timeout;
        loop {
            if self.dispatcher.in_flight_count() <= 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("router.drain.timed-out");
                return Err(ProxyError::DrainTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Closes the listener and stops the diagnostic listener. Idempotent.
    pub async fn stop(&mut self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_listener();
        if let Some(mut diagnostics) = self.diagnostics.take() {
            diagnostics.stop().await;
        }
    }

    fn close_listener(&mut self) {
        if let Some(cancel) = self.accept_cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

/// Waits for a termination signal and reports the intended action.
///
/// `SIGTERM`/`SIGINT` call for an immediate stop; `SIGUSR1` calls for a
/// drain before stopping. Signals received after the first one are logged
/// and otherwise ignored, matching the original router's behavior during
/// shutdown.
pub enum ShutdownSignal {
    Stop,
    DrainThenStop,
}

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("install SIGUSR1 handler");

    tokio::select! {
        _ = sigterm.recv() => ShutdownSignal::Stop,
        _ = sigint.recv() => ShutdownSignal::Stop,
        _ = sigusr1.recv() => ShutdownSignal::DrainThenStop,
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let _ = tokio::signal::ctrl_c().await;
    ShutdownSignal::Stop
}

pub async fn ignore_further_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::spawn(async move {
                loop {
                    sigterm.recv().await;
                    info!("signal received during shutdown, ignoring");
                }
            });
        }
    }
}
