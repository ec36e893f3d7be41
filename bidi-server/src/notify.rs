//! Push notification delivery.
//!
//! Every notification is written to the recipient's durable queue before a
//! live worker sees it. A worker owns the socket of one user's notification
//! channel: it first flushes the persisted queue as one batch, then forwards
//! whatever it is handed until it is told to close or the socket dies.
//! At most one worker per user is registered; a new one replaces the old.
//!
//! Records leave the queue only when the client acknowledges them.

use crate::event_log::{EventLog, LogEntry, LogEventId};
use bidi_protocol::types::LogLevel;
use bidi_protocol::{
    FramedStream, Notification, NotificationBatch, ProtocolError, TextKey, TextProperty,
};
use bidi_storage::{NotificationStore, StorageError};
use dashmap::DashMap;
use rsa::RsaPublicKey;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

/// Pending notifications per worker. A full channel only delays delivery:
/// the notification is already persisted and goes out with the next flush.
const WORKER_CHANNEL_CAPACITY: usize = 64;

struct WorkerHandle {
    worker_id: u64,
    tx: mpsc::Sender<Notification>,
    cancel: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Interrupts the worker, including a send blocked on a stalled peer.
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

pub struct NotificationHub {
    store: NotificationStore,
    workers: DashMap<String, WorkerHandle>,
    next_worker_id: AtomicU64,
    event_log: Arc<EventLog>,
}

impl NotificationHub {
    pub fn new(store: NotificationStore, event_log: Arc<EventLog>) -> Self {
        Self {
            store,
            workers: DashMap::new(),
            next_worker_id: AtomicU64::new(1),
            event_log,
        }
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    /// Persists the notification, then hands it to the user's live worker
    /// if there is one.
    pub fn push(&self, user_id: &str, notification: Notification) -> Result<(), StorageError> {
        self.store.store(user_id, &notification)?;

        if let Some(worker) = self.workers.get(user_id) {
            if worker.tx.try_send(notification).is_err() {
                tracing::debug!(
                    "Worker of {} busy or gone, notification stays queued",
                    user_id
                );
            }
        }
        Ok(())
    }

    /// Removes an acknowledged notification. Repeated acknowledgements are
    /// no-ops.
    pub fn acknowledge(&self, user_id: &str, notification_id: &str) -> Result<bool, StorageError> {
        self.store.delete(user_id, notification_id)
    }

    /// Takes over `stream` as the notification channel of `user_id`,
    /// closing any channel the user had before.
    pub fn start_worker<S>(
        self: &Arc<Self>,
        user_id: String,
        public_key: RsaPublicKey,
        stream: FramedStream<S>,
        peer: String,
    ) -> tokio::task::JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let (cancel, cancelled) = watch::channel(false);

        let handle = WorkerHandle {
            worker_id,
            tx,
            cancel,
        };
        if let Some(previous) = self.workers.insert(user_id.clone(), handle) {
            tracing::debug!("[{}] Replacing notification channel of {}", peer, user_id);
            previous.cancel();
        }

        let worker = Worker {
            hub: Arc::clone(self),
            worker_id,
            user_id,
            public_key,
            peer,
        };
        tokio::spawn(worker.run(stream, rx, cancelled))
    }

    /// Closes the user's live channel. Returns whether there was one.
    pub fn stop_worker(&self, user_id: &str) -> bool {
        match self.workers.remove(user_id) {
            Some((_, worker)) => {
                worker.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let users: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        for user_id in users {
            self.stop_worker(&user_id);
        }
    }

    /// Sends a ping to every live channel so dead sockets surface.
    pub fn pulse(&self) -> usize {
        let mut sent = 0;
        for worker in self.workers.iter() {
            if worker.tx.try_send(Notification::ping()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.workers.contains_key(user_id)
    }

    pub fn connected_count(&self) -> usize {
        self.workers.len()
    }

    fn unregister(&self, user_id: &str, worker_id: u64) {
        self.workers
            .remove_if(user_id, |_, handle| handle.worker_id == worker_id);
    }
}

/// Resolves once the worker is cancelled or its handle is gone.
async fn cancelled(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|cancelled| *cancelled).await;
}

struct Worker {
    hub: Arc<NotificationHub>,
    worker_id: u64,
    user_id: String,
    public_key: RsaPublicKey,
    peer: String,
}

impl Worker {
    async fn run<S>(
        self,
        mut stream: FramedStream<S>,
        mut rx: mpsc::Receiver<Notification>,
        mut cancel: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // The channel lives as long as the client keeps it open
        stream.set_read_timeout(None);
        tracing::info!("[{}] Notification channel of {} open", self.peer, self.user_id);

        let pending = match self.hub.store.load_all(&self.user_id) {
            Ok(pending) => pending,
            Err(e) => {
                self.log_unexpected(&e.to_string());
                Vec::new()
            }
        };
        let flushed: HashSet<String> = pending.iter().filter_map(|n| n.id.clone()).collect();
        let flush = NotificationBatch {
            notifications: pending,
        };

        let mut open = tokio::select! {
            _ = cancelled(&mut cancel) => false,
            result = self.send(&mut stream, flush) => match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("[{}] Initial flush failed: {}", self.peer, e);
                    false
                }
            },
        };

        while open {
            let notification = tokio::select! {
                _ = cancelled(&mut cancel) => None,
                next = rx.recv() => next,
            };
            let Some(notification) = notification else {
                break;
            };

            // Already part of the initial flush
            if notification.id.as_ref().is_some_and(|id| flushed.contains(id)) {
                continue;
            }

            let batch = NotificationBatch::single(notification);
            let result = tokio::select! {
                _ = cancelled(&mut cancel) => break,
                result = self.send(&mut stream, batch) => result,
            };
            match result {
                Ok(()) => {}
                Err(ProtocolError::Io(e)) => {
                    tracing::debug!("[{}] Notification channel lost: {}", self.peer, e);
                    open = false;
                }
                Err(ProtocolError::ConnectionClosed) => open = false,
                Err(e) => self.log_unexpected(&e.to_string()),
            }
        }

        self.hub.unregister(&self.user_id, self.worker_id);
        let _ = stream.shutdown().await;
        tracing::info!("[{}] Notification channel of {} closed", self.peer, self.user_id);
    }

    async fn send<S>(
        &self,
        stream: &mut FramedStream<S>,
        batch: NotificationBatch,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.send_rsa(&batch.to_json()?, &self.public_key).await
    }

    fn log_unexpected(&self, message: &str) {
        let text = TextProperty::new(TextKey::NotificationSocketUnexpectedError)
            .with_arg(&self.user_id)
            .with_arg(message);
        self.hub.event_log.log(
            LogEntry::new(LogEventId::E7, LogLevel::Error, text.resolve())
                .ip(&self.peer)
                .user(&self.user_id),
        );
    }
}
