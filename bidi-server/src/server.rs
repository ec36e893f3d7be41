//! TCP server implementation.

use crate::connection::{Connection, ConnectionOutcome};
use crate::error::ServerError;
use crate::event_log::{LogEntry, LogEventId};
use crate::handler::RequestHandler;
use crate::pulse::PulseManager;
use crate::state::ServerState;
use bidi_protocol::types::LogLevel;
use bidi_protocol::{FramedStream, TextKey, TextProperty};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_refused: AtomicU64,
    pub requests_answered: AtomicU64,
    pub handshakes_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for bidi.
pub struct Server {
    state: Arc<ServerState>,
    handler: Arc<RequestHandler>,
    listener: TcpListener,
    local_addr: SocketAddr,
    stats: Arc<ServerStats>,
    running: AtomicBool,
}

impl Server {
    /// Binds the configured address. A failure is logged as "not started".
    pub async fn bind(state: Arc<ServerState>) -> Result<Self, ServerError> {
        let config = state.config();
        let bind_addr = config.network.bind_addr;

        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let text = TextProperty::new(TextKey::ServerNotStarted)
                    .with_arg(&config.network.url)
                    .with_arg(bind_addr.port());
                state.event_log().message(
                    LogEventId::C1,
                    LogLevel::Critical,
                    format!("{} {}", text.resolve(), e),
                );
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        Ok(Self {
            handler: Arc::new(RequestHandler::new(Arc::clone(&state))),
            state,
            listener,
            local_addr,
            stats: Arc::new(ServerStats::default()),
            running: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accepts connections until the server state signals shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let config = self.state.config();
        let socket_timeout = config.network.socket_timeout();
        let connection_slots = Arc::new(Semaphore::new(config.network.max_connections));

        let pulse = Arc::new(PulseManager::new(
            Arc::clone(&self.state),
            config.notifications.pulse_interval(),
        ));
        let pulse_task = {
            let pulse = Arc::clone(&pulse);
            tokio::spawn(async move { pulse.run().await })
        };

        let mut shutdown_rx = self.state.subscribe_shutdown();
        self.running.store(true, Ordering::SeqCst);

        let started = TextProperty::new(TextKey::ServerStarted)
            .with_arg(&config.network.url)
            .with_arg(self.local_addr.port());
        self.state
            .event_log()
            .message(LogEventId::G1, LogLevel::General, started.resolve());
        tracing::info!(
            "Server listening on {} (max {} connections)",
            self.local_addr,
            config.network.max_connections
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            // Refused, not queued, once every slot is taken
                            let slot = Arc::clone(&connection_slots).try_acquire_owned();
                            let Ok(permit) = slot else {
                                tracing::warn!("Connection limit reached, refusing {}", addr);
                                self.stats.connections_refused.fetch_add(1, Ordering::Relaxed);
                                drop(tcp_stream);
                                continue;
                            };

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let handler = Arc::clone(&self.handler);
                            let stats = Arc::clone(&self.stats);

                            tokio::spawn(serve_connection(
                                tcp_stream,
                                addr,
                                handler,
                                stats,
                                permit,
                                socket_timeout,
                            ));
                        }
                        Err(e) => {
                            let text = TextProperty::new(TextKey::ServerSocketAcceptError)
                                .with_arg(&e);
                            self.state.event_log().log(
                                LogEntry::new(LogEventId::E1, LogLevel::Error, text.resolve()),
                            );
                            self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        pulse.shutdown();
        self.state.notifications().stop_all();
        if let Err(e) = pulse_task.await {
            self.state.event_log().message(
                LogEventId::E2,
                LogLevel::Error,
                format!("Pulse task failed: {}", e),
            );
        }

        self.running.store(false, Ordering::SeqCst);
        self.state.event_log().message(
            LogEventId::G2,
            LogLevel::Information,
            TextProperty::new(TextKey::ShutdownDone).resolve(),
        );
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.state.request_shutdown();
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Runs one accepted connection while it holds a connection slot.
async fn serve_connection(
    tcp_stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    stats: Arc<ServerStats>,
    _permit: OwnedSemaphorePermit,
    socket_timeout: Duration,
) {
    let _ = tcp_stream.set_nodelay(true);
    tracing::debug!("[{}] Connection accepted", addr);

    let stream = FramedStream::new(tcp_stream).with_timeout(Some(socket_timeout));
    let outcome = Connection::new(stream, addr.to_string(), handler).run().await;

    match outcome {
        ConnectionOutcome::Answered | ConnectionOutcome::Promoted => {
            stats.requests_answered.fetch_add(1, Ordering::Relaxed);
        }
        ConnectionOutcome::Rejected => {
            stats.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
        }
        ConnectionOutcome::Failed => {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!("[{}] Connection done: {:?}", addr, outcome);
}
