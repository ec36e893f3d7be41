//! Notification channel: the reconnect loop and the receiver task.

use crate::client::Client;
use bidi_protocol::{FramedStream, NotificationBatch, ProtocolError};
use rsa::RsaPrivateKey;
use std::sync::Weak;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens the notification channel whenever it is down. Ends with the client.
pub(crate) async fn reconnect_loop(client: Weak<Client>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(client) = client.upgrade() else {
            break;
        };
        if client.is_connected() {
            continue;
        }
        if let Err(e) = client.establish_notification_channel().await {
            tracing::debug!(
                "Notification channel of {} not established: {}",
                client.user_id(),
                e
            );
        }
    }
}

/// Reads notification batches until the channel breaks, handing each
/// notification to the handler and acknowledging it.
pub(crate) async fn receive(
    client: Weak<Client>,
    mut stream: FramedStream<TcpStream>,
    private_key: RsaPrivateKey,
) {
    // The server only writes; the channel may stay quiet for long
    stream.set_read_timeout(None);

    let reason = loop {
        let batch = match stream.recv_rsa(&private_key).await {
            Ok(text) => NotificationBatch::from_json(&text),
            Err(e) => break e,
        };
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("Discarding undecodable notification batch: {}", e);
                continue;
            }
        };

        let Some(client) = client.upgrade() else {
            return;
        };
        deliver(&client, batch, &private_key).await;
    };

    match reason {
        ProtocolError::ConnectionClosed => tracing::debug!("Notification channel closed"),
        e => tracing::debug!("Notification channel lost: {}", e),
    }
    if let Some(client) = client.upgrade() {
        client.set_connected(false);
    }
}

async fn deliver(client: &Client, batch: NotificationBatch, private_key: &RsaPrivateKey) {
    for notification in batch.notifications {
        if notification.is_ping() {
            continue;
        }
        let Some(id) = notification.id.clone() else {
            continue;
        };

        let payload = match notification.open_payload(private_key) {
            Ok(payload) => payload,
            Err(e) => {
                // Left on the server; delivered again with the next channel
                tracing::warn!("Notification {} could not be opened: {}", id, e);
                continue;
            }
        };

        client.handler().on_notification(&notification, payload);

        if let Err(e) = client.acknowledge(&id).await {
            tracing::warn!("Notification {} not acknowledged: {}", id, e);
        }
    }
}
