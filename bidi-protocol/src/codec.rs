//! Frame buffering and the layered envelopes over an async byte stream.
//!
//! Three layers share one framing: raw frames, RSA chunk envelopes (used
//! before a session exists) and AES session envelopes (gzip, then AES-CBC).

use crate::crypto::{self, SessionCipher};
use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::BytesMut;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 8192;

/// Accumulates bytes and splits them into frames.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A byte stream speaking the bidi framing.
///
/// Reads honour an optional timeout; `None` blocks until the peer sends or
/// closes.
pub struct FramedStream<S> {
    stream: S,
    decoder: Decoder,
    read_timeout: Option<Duration>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            read_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub async fn read_frame(&mut self) -> Result<Frame, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.decode_frame()? {
                return Ok(frame);
            }

            let read = self.stream.read(&mut chunk);
            let n = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                    ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "read timed out",
                    ))
                })??,
                None => read.await?,
            };
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.decoder.extend(&chunk[..n]);
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.write_frame(&Frame::new(data.to_vec())).await
    }

    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.read_frame().await?.payload.to_vec())
    }

    pub async fn send_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.write_frame(&Frame::from_u32(value)).await
    }

    pub async fn recv_u32(&mut self) -> Result<u32, ProtocolError> {
        self.read_frame().await?.to_u32()
    }

    // ------------------------------------------------------------------
    // RSA chunk envelopes
    // ------------------------------------------------------------------

    pub async fn send_rsa(&mut self, text: &str, key: &RsaPublicKey) -> Result<(), ProtocolError> {
        let sealed = crypto::rsa_encrypt(text, key)?;
        self.send_bytes(&sealed).await
    }

    pub async fn recv_rsa(&mut self, key: &RsaPrivateKey) -> Result<String, ProtocolError> {
        let data = self.recv_bytes().await?;
        crypto::rsa_decrypt(&data, key)
    }

    // ------------------------------------------------------------------
    // AES session envelopes
    // ------------------------------------------------------------------

    pub async fn send_aes(
        &mut self,
        text: &str,
        cipher: &SessionCipher,
    ) -> Result<(), ProtocolError> {
        let sealed = cipher.seal_text(text)?;
        self.send_bytes(&sealed).await
    }

    pub async fn recv_aes(&mut self, cipher: &SessionCipher) -> Result<String, ProtocolError> {
        let data = self.recv_bytes().await?;
        cipher.open_text(&data)
    }

    // ------------------------------------------------------------------
    // Envelope helpers
    // ------------------------------------------------------------------

    pub async fn send_envelope_rsa(
        &mut self,
        envelope: &Envelope,
        key: &RsaPublicKey,
    ) -> Result<(), ProtocolError> {
        self.send_rsa(&envelope.to_json()?, key).await
    }

    pub async fn recv_envelope_rsa(
        &mut self,
        key: &RsaPrivateKey,
    ) -> Result<Envelope, ProtocolError> {
        Envelope::from_json(&self.recv_rsa(key).await?)
    }

    pub async fn send_envelope_aes(
        &mut self,
        envelope: &Envelope,
        cipher: &SessionCipher,
    ) -> Result<(), ProtocolError> {
        self.send_aes(&envelope.to_json()?, cipher).await
    }

    pub async fn recv_envelope_aes(
        &mut self,
        cipher: &SessionCipher,
    ) -> Result<Envelope, ProtocolError> {
        Envelope::from_json(&self.recv_aes(cipher).await?)
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, AES_KEY_LEN};
    use crate::envelope::{RequestMessage, RequestType};

    #[test]
    fn test_decoder_multiple_frames() {
        let mut decoder = Decoder::new();
        decoder.extend(&Frame::new(&b"one"[..]).encode().unwrap());
        decoder.extend(&Frame::new(&b"two"[..]).encode().unwrap());

        assert_eq!(&decoder.decode_frame().unwrap().unwrap().payload[..], b"one");
        assert_eq!(&decoder.decode_frame().unwrap().unwrap().payload[..], b"two");
        assert!(decoder.decode_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = FramedStream::new(a);
        let mut right = FramedStream::new(b);

        let big = vec![7u8; 1000];
        let writer = tokio::spawn(async move {
            left.send_bytes(&big).await.unwrap();
            left.send_u32(42).await.unwrap();
            left
        });

        assert_eq!(right.recv_bytes().await.unwrap(), vec![7u8; 1000]);
        assert_eq!(right.recv_u32().await.unwrap(), 42);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut right = FramedStream::new(b);
        assert!(matches!(
            right.read_frame().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut right = FramedStream::new(b).with_timeout(Some(Duration::from_millis(20)));
        match right.read_frame().await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_rsa_envelope() {
        let keys = KeyPair::generate().unwrap();
        let (a, b) = tokio::io::duplex(4096);
        let mut left = FramedStream::new(a);
        let mut right = FramedStream::new(b);

        let request = RequestMessage::new(RequestType::Ping);
        left.send_envelope_rsa(&request.clone().into(), &keys.public)
            .await
            .unwrap();
        let got = right
            .recv_envelope_rsa(&keys.private)
            .await
            .unwrap()
            .into_request()
            .unwrap();
        assert_eq!(got, request);
    }

    #[tokio::test]
    async fn test_aes_envelope_and_wrong_key() {
        let cipher = SessionCipher::with_random_iv([3u8; AES_KEY_LEN]);
        let other = SessionCipher::with_random_iv([4u8; AES_KEY_LEN]);
        let (a, b) = tokio::io::duplex(4096);
        let mut left = FramedStream::new(a);
        let mut right = FramedStream::new(b);

        left.send_aes("hello session", &cipher).await.unwrap();
        assert_eq!(right.recv_aes(&cipher).await.unwrap(), "hello session");

        left.send_aes("hello again", &cipher).await.unwrap();
        assert!(right.recv_aes(&other).await.is_err());
    }
}
