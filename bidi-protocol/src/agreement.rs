//! Diffie-Hellman key agreement over an established framed stream.
//!
//! Exchange, one frame per step:
//!
//! ```text
//! client                                  server
//!   | -- DH public key {p, g, y} ----------> |
//!   | <--------- DH public key {p, g, y} --- |
//!   | -- shared secret length (u32) -------> |
//!   | <------------------ server AES IV ---- |
//!   | -- client AES IV --------------------> |
//!   | <----------- AES(session id) --------- |
//! ```
//!
//! Both sides derive the AES key from the first 16 bytes of the shared
//! secret; each side encrypts with its own IV.

use crate::codec::FramedStream;
use crate::crypto::{aes_key_from_secret, Ciphers, DhKeyPair, DhPublicKey, SessionCipher};
use crate::error::ProtocolError;
use tokio::io::{AsyncRead, AsyncWrite};

/// Client side. Returns the ciphers together with the session id chosen
/// by the server.
pub async fn key_agreement_client<S>(
    stream: &mut FramedStream<S>,
) -> Result<Ciphers, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let own = DhKeyPair::generate()?;
    stream.send_bytes(&own.public_key().to_bytes()?).await?;

    let peer = DhPublicKey::from_bytes(&stream.recv_bytes().await?)?;
    let secret = own.agree(&peer)?;
    let secret_len = u32::try_from(secret.len())
        .map_err(|_| ProtocolError::KeyAgreement("shared secret too long".to_string()))?;
    stream.send_u32(secret_len).await?;

    let key = aes_key_from_secret(&secret)?;
    let server_iv = stream.recv_bytes().await?;
    let decrypt = SessionCipher::from_peer_iv(key, &server_iv)?;

    let encrypt = SessionCipher::with_random_iv(key);
    stream.send_bytes(encrypt.iv()).await?;

    let session_id = stream.recv_aes(&decrypt).await?;

    Ok(Ciphers {
        session_id,
        encrypt,
        decrypt,
    })
}

/// Server side. Generates the session id and sends it as the first
/// symmetric message.
///
/// The modular exponentiations run on the blocking pool.
pub async fn key_agreement_server<S>(
    stream: &mut FramedStream<S>,
) -> Result<Ciphers, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = DhPublicKey::from_bytes(&stream.recv_bytes().await?)?;
    let proposed = peer.clone();
    let own = blocking(move || DhKeyPair::from_peer(&proposed)).await?;
    stream.send_bytes(&own.public_key().to_bytes()?).await?;

    let announced = stream.recv_u32().await? as usize;
    let secret = blocking(move || own.agree(&peer)).await?;
    if announced != secret.len() {
        return Err(ProtocolError::KeyAgreement(format!(
            "peer announced a {}-byte secret, derived {} bytes",
            announced,
            secret.len()
        )));
    }

    let key = aes_key_from_secret(&secret)?;
    let encrypt = SessionCipher::with_random_iv(key);
    stream.send_bytes(encrypt.iv()).await?;

    let client_iv = stream.recv_bytes().await?;
    let decrypt = SessionCipher::from_peer_iv(key, &client_iv)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    stream.send_aes(&session_id, &encrypt).await?;

    Ok(Ciphers {
        session_id,
        encrypt,
        decrypt,
    })
}

async fn blocking<T, F>(work: F) -> Result<T, ProtocolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProtocolError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProtocolError::KeyAgreement(format!("key agreement task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_both_sides_agree() {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let mut client = FramedStream::new(a);
        let mut server = FramedStream::new(b);

        let server_task = tokio::spawn(async move {
            let ciphers = key_agreement_server(&mut server).await.unwrap();
            (ciphers, server)
        });
        let client_ciphers = key_agreement_client(&mut client).await.unwrap();
        let (server_ciphers, mut server) = server_task.await.unwrap();

        assert_eq!(client_ciphers.session_id, server_ciphers.session_id);
        assert!(uuid::Uuid::parse_str(&client_ciphers.session_id).is_ok());

        client
            .send_aes("from client", &client_ciphers.encrypt)
            .await
            .unwrap();
        assert_eq!(
            server.recv_aes(&server_ciphers.decrypt).await.unwrap(),
            "from client"
        );

        server
            .send_aes("from server", &server_ciphers.encrypt)
            .await
            .unwrap();
        assert_eq!(
            client.recv_aes(&client_ciphers.decrypt).await.unwrap(),
            "from server"
        );
    }

    #[tokio::test]
    async fn test_garbage_public_key_fails() {
        let (a, b) = tokio::io::duplex(1024);
        let mut client = FramedStream::new(a);
        let mut server = FramedStream::new(b);

        client.send_bytes(b"not a key").await.unwrap();
        assert!(key_agreement_server(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_group_is_refused_before_reply() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = FramedStream::new(a);
        let mut server = FramedStream::new(b);

        let mut proposal = DhKeyPair::generate().unwrap().public_key();
        proposal.p = "f".repeat(8192);
        client.send_bytes(&proposal.to_bytes().unwrap()).await.unwrap();

        assert!(matches!(
            key_agreement_server(&mut server).await,
            Err(ProtocolError::KeyAgreement(_))
        ));
        drop(server);
        assert!(matches!(
            client.read_frame().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
