//! Cryptographic primitives used by the handshake and the session channel.
//!
//! - RSA (PKCS#1 v1.5) over fixed-size plaintext chunks, each ciphertext chunk
//!   prefixed by a one-byte length.
//! - Finite-field Diffie-Hellman over the 2048-bit MODP group.
//! - AES-128/CBC/PKCS#7 session ciphers over gzip-compressed plaintext.

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// RSA modulus size for user and server identities.
pub const RSA_KEY_BITS: usize = 512;

/// Maximum plaintext bytes per RSA chunk.
pub const RSA_CHUNK_LEN: usize = 50;

/// AES key length taken from the front of the DH shared secret.
pub const AES_KEY_LEN: usize = 16;

/// AES block / IV length.
pub const AES_IV_LEN: usize = 16;

/// Bytes of randomness used for a DH private exponent.
const DH_PRIVATE_BYTES: usize = 32;

/// RFC 3526 group 14 prime (2048-bit MODP).
const MODP_2048_P: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

// ============================================================================
// RSA
// ============================================================================

/// An RSA identity key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair of [`RSA_KEY_BITS`].
    pub fn generate() -> Result<Self, ProtocolError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Restores a key pair from its base64 PKCS#8 private key.
    pub fn from_private_base64(encoded: &str) -> Result<Self, ProtocolError> {
        let private = decode_private_key(encoded)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_base64(&self) -> Result<String, ProtocolError> {
        encode_public_key(&self.public)
    }

    pub fn private_base64(&self) -> Result<String, ProtocolError> {
        encode_private_key(&self.private)
    }
}

/// Encodes a public key as base64 SubjectPublicKeyInfo DER.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, ProtocolError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

pub fn decode_public_key(encoded: &str) -> Result<RsaPublicKey, ProtocolError> {
    let der = BASE64
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| ProtocolError::InvalidKey(e.to_string()))
}

/// Encodes a private key as base64 PKCS#8 DER.
pub fn encode_private_key(key: &RsaPrivateKey) -> Result<String, ProtocolError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

pub fn decode_private_key(encoded: &str) -> Result<RsaPrivateKey, ProtocolError> {
    let der = BASE64
        .decode(encoded.trim())
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| ProtocolError::InvalidKey(e.to_string()))
}

/// Short SHA-256 fingerprint of a public key, for logs and CLI output.
pub fn fingerprint(key: &RsaPublicKey) -> Result<String, ProtocolError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(hex::encode(&digest[..8]))
}

/// Encrypts `text` in chunks of at most [`RSA_CHUNK_LEN`] plaintext bytes.
///
/// Output layout: repeated `[len: u8][ciphertext: len bytes]`.
pub fn rsa_encrypt(text: &str, key: &RsaPublicKey) -> Result<Vec<u8>, ProtocolError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() * 2);

    for chunk in bytes.chunks(RSA_CHUNK_LEN) {
        let encrypted = key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, chunk)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        let len = u8::try_from(encrypted.len()).map_err(|_| {
            ProtocolError::Crypto(format!(
                "RSA chunk of {} bytes does not fit a one-byte length",
                encrypted.len()
            ))
        })?;
        out.push(len);
        out.extend_from_slice(&encrypted);
    }

    Ok(out)
}

/// Reverses [`rsa_encrypt`].
pub fn rsa_decrypt(data: &[u8], key: &RsaPrivateKey) -> Result<String, ProtocolError> {
    let mut plain = Vec::with_capacity(data.len());
    let mut pos = 0;

    while pos < data.len() {
        let len = data[pos] as usize;
        pos += 1;
        let end = pos + len;
        if len == 0 || end > data.len() {
            return Err(ProtocolError::Crypto(format!(
                "truncated RSA chunk at offset {}",
                pos - 1
            )));
        }
        let decrypted = key
            .decrypt(Pkcs1v15Encrypt, &data[pos..end])
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        plain.extend_from_slice(&decrypted);
        pos = end;
    }

    String::from_utf8(plain).map_err(|_| ProtocolError::InvalidUtf8)
}

/// RSA-encrypts `text` and returns it base64 encoded.
pub fn rsa_seal_base64(text: &str, key: &RsaPublicKey) -> Result<String, ProtocolError> {
    Ok(BASE64.encode(rsa_encrypt(text, key)?))
}

pub fn rsa_open_base64(sealed: &str, key: &RsaPrivateKey) -> Result<String, ProtocolError> {
    let data = BASE64
        .decode(sealed)
        .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
    rsa_decrypt(&data, key)
}

// ============================================================================
// Compression
// ============================================================================

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ProtocolError::Compression(e.to_string()))
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    Ok(out)
}

// ============================================================================
// AES session ciphers
// ============================================================================

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// One direction of an AES-128/CBC channel.
///
/// Every message is encrypted from the same key and IV, so both ends only need
/// to agree on them once.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; AES_KEY_LEN],
    iv: [u8; AES_IV_LEN],
}

impl SessionCipher {
    pub fn new(key: [u8; AES_KEY_LEN], iv: [u8; AES_IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Creates a cipher with a fresh random IV.
    pub fn with_random_iv(key: [u8; AES_KEY_LEN]) -> Self {
        let mut iv = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Creates a cipher from the IV bytes announced by the peer.
    pub fn from_peer_iv(key: [u8; AES_KEY_LEN], iv: &[u8]) -> Result<Self, ProtocolError> {
        let iv: [u8; AES_IV_LEN] = iv.try_into().map_err(|_| {
            ProtocolError::KeyAgreement(format!(
                "expected {}-byte IV, got {}",
                AES_IV_LEN,
                iv.len()
            ))
        })?;
        Ok(Self { key, iv })
    }

    pub fn iv(&self) -> &[u8; AES_IV_LEN] {
        &self.iv
    }

    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| ProtocolError::Crypto("AES decryption failed".to_string()))
    }

    /// Compresses then encrypts a string.
    pub fn seal_text(&self, text: &str) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.encrypt(&gzip(text.as_bytes())?))
    }

    /// Decrypts then decompresses a string.
    pub fn open_text(&self, data: &[u8]) -> Result<String, ProtocolError> {
        let plain = gunzip(&self.decrypt(data)?)?;
        String::from_utf8(plain).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

/// The negotiated cipher pair of one session.
#[derive(Debug, Clone)]
pub struct Ciphers {
    pub session_id: String,
    pub encrypt: SessionCipher,
    pub decrypt: SessionCipher,
}

// ============================================================================
// Diffie-Hellman
// ============================================================================

/// Public half of a DH key, carrying its group so the peer can derive a
/// matching key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhPublicKey {
    /// Prime modulus, hex.
    pub p: String,
    /// Generator, hex.
    pub g: String,
    /// Public value, hex.
    pub y: String,
}

impl DhPublicKey {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Clone)]
pub struct DhKeyPair {
    p: BigUint,
    g: BigUint,
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Client side: generates a key pair over the 2048-bit MODP group.
    pub fn generate() -> Result<Self, ProtocolError> {
        let (p, g) = modp_2048()?;
        Ok(Self::with_group(p, g))
    }

    /// Server side: derives a key pair over the group announced by the peer.
    ///
    /// Only the 2048-bit MODP group is accepted; any other modulus or
    /// generator is refused before any exponentiation happens.
    pub fn from_peer(peer: &DhPublicKey) -> Result<Self, ProtocolError> {
        let (p, g) = modp_2048()?;
        if parse_hex(&peer.p, "p")? != p || parse_hex(&peer.g, "g")? != g {
            return Err(ProtocolError::KeyAgreement(
                "peer proposed an unsupported DH group".to_string(),
            ));
        }
        Ok(Self::with_group(p, g))
    }

    fn with_group(p: BigUint, g: BigUint) -> Self {
        let mut bytes = [0u8; DH_PRIVATE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let private = BigUint::from_bytes_be(&bytes) + BigUint::from(2u32);
        let public = g.modpow(&private, &p);
        Self {
            p,
            g,
            private,
            public,
        }
    }

    pub fn public_key(&self) -> DhPublicKey {
        DhPublicKey {
            p: self.p.to_str_radix(16),
            g: self.g.to_str_radix(16),
            y: self.public.to_str_radix(16),
        }
    }

    /// Computes the shared secret, left-padded to the modulus length.
    pub fn agree(&self, peer: &DhPublicKey) -> Result<Vec<u8>, ProtocolError> {
        if parse_hex(&peer.p, "p")? != self.p || parse_hex(&peer.g, "g")? != self.g {
            return Err(ProtocolError::KeyAgreement(
                "peer uses different group parameters".to_string(),
            ));
        }
        let y = parse_hex(&peer.y, "y")?;
        let one = BigUint::from(1u32);
        let p_minus_one = &self.p - &one;
        if y <= one || y >= p_minus_one {
            return Err(ProtocolError::KeyAgreement(
                "peer public value out of range".to_string(),
            ));
        }

        let shared = y.modpow(&self.private, &self.p).to_bytes_be();
        let width = (self.p.bits() + 7) / 8;
        let mut secret = vec![0u8; width.saturating_sub(shared.len())];
        secret.extend_from_slice(&shared);
        Ok(secret)
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("bits", &self.p.bits())
            .finish_non_exhaustive()
    }
}

fn modp_2048() -> Result<(BigUint, BigUint), ProtocolError> {
    let p = BigUint::parse_bytes(MODP_2048_P.as_bytes(), 16)
        .ok_or_else(|| ProtocolError::KeyAgreement("bad built-in prime".to_string()))?;
    Ok((p, BigUint::from(2u32)))
}

fn parse_hex(value: &str, field: &str) -> Result<BigUint, ProtocolError> {
    // No DH field of the supported group needs more digits than its prime
    if value.len() > MODP_2048_P.len() {
        return Err(ProtocolError::KeyAgreement(format!(
            "DH field {} has {} hex digits",
            field,
            value.len()
        )));
    }
    BigUint::parse_bytes(value.as_bytes(), 16)
        .ok_or_else(|| ProtocolError::KeyAgreement(format!("invalid hex in DH field {}", field)))
}

/// Derives the AES key from the first bytes of a shared secret.
pub fn aes_key_from_secret(secret: &[u8]) -> Result<[u8; AES_KEY_LEN], ProtocolError> {
    secret
        .get(..AES_KEY_LEN)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ProtocolError::KeyAgreement("shared secret too short".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| KeyPair::generate().unwrap())
    }

    #[test]
    fn test_rsa_chunked_roundtrip() {
        let text = "x".repeat(RSA_CHUNK_LEN * 3 + 7);
        let sealed = rsa_encrypt(&text, &keys().public).unwrap();

        // 4 chunks, each 64 bytes of ciphertext plus a length byte
        assert_eq!(sealed.len(), 4 * (1 + RSA_KEY_BITS / 8));
        assert_eq!(sealed[0] as usize, RSA_KEY_BITS / 8);
        assert_eq!(rsa_decrypt(&sealed, &keys().private).unwrap(), text);
    }

    #[test]
    fn test_rsa_empty_text() {
        let sealed = rsa_encrypt("", &keys().public).unwrap();
        assert!(sealed.is_empty());
        assert_eq!(rsa_decrypt(&sealed, &keys().private).unwrap(), "");
    }

    #[test]
    fn test_rsa_multibyte_text_split_across_chunks() {
        let text = "äöü€".repeat(20);
        let sealed = rsa_encrypt(&text, &keys().public).unwrap();
        assert_eq!(rsa_decrypt(&sealed, &keys().private).unwrap(), text);
    }

    #[test]
    fn test_rsa_truncated_input_is_error() {
        let mut sealed = rsa_encrypt("hello", &keys().public).unwrap();
        sealed.truncate(sealed.len() - 1);
        assert!(matches!(
            rsa_decrypt(&sealed, &keys().private),
            Err(ProtocolError::Crypto(_))
        ));
    }

    #[test]
    fn test_rsa_wrong_key_is_error() {
        let other = KeyPair::generate().unwrap();
        let sealed = rsa_encrypt("secret", &keys().public).unwrap();
        assert!(rsa_decrypt(&sealed, &other.private).is_err());
    }

    #[test]
    fn test_key_base64_roundtrip() {
        let public = keys().public_base64().unwrap();
        let private = keys().private_base64().unwrap();

        assert_eq!(decode_public_key(&public).unwrap(), keys().public);
        let restored = KeyPair::from_private_base64(&private).unwrap();
        assert_eq!(restored.public, keys().public);
        assert!(decode_public_key("not base64!").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint(&keys().public).unwrap();
        let b = fingerprint(&keys().public).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_gzip_roundtrip_and_garbage() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let packed = gzip(data).unwrap();
        assert_eq!(gunzip(&packed).unwrap(), data);
        assert!(matches!(
            gunzip(b"definitely not gzip"),
            Err(ProtocolError::Compression(_))
        ));
    }

    #[test]
    fn test_session_cipher_roundtrip() {
        let key = [7u8; AES_KEY_LEN];
        let enc = SessionCipher::with_random_iv(key);
        let dec = SessionCipher::from_peer_iv(key, enc.iv()).unwrap();

        let sealed = enc.seal_text("{\"hello\":\"world\"}").unwrap();
        assert_eq!(sealed.len() % AES_IV_LEN, 0);
        assert_eq!(dec.open_text(&sealed).unwrap(), "{\"hello\":\"world\"}");
    }

    #[test]
    fn test_session_cipher_wrong_key_fails() {
        let enc = SessionCipher::with_random_iv([1u8; AES_KEY_LEN]);
        let dec = SessionCipher::from_peer_iv([2u8; AES_KEY_LEN], enc.iv()).unwrap();
        let sealed = enc.seal_text("payload").unwrap();
        assert!(dec.open_text(&sealed).is_err());
    }

    #[test]
    fn test_peer_iv_length_checked() {
        assert!(SessionCipher::from_peer_iv([0u8; AES_KEY_LEN], &[0u8; 8]).is_err());
    }

    #[test]
    fn test_dh_agreement() {
        let client = DhKeyPair::generate().unwrap();
        let client_pub = DhPublicKey::from_bytes(&client.public_key().to_bytes().unwrap()).unwrap();

        let server = DhKeyPair::from_peer(&client_pub).unwrap();
        let server_secret = server.agree(&client_pub).unwrap();
        let client_secret = client.agree(&server.public_key()).unwrap();

        assert_eq!(server_secret, client_secret);
        assert_eq!(server_secret.len(), 256);
        assert_eq!(
            aes_key_from_secret(&server_secret).unwrap(),
            aes_key_from_secret(&client_secret).unwrap()
        );
    }

    #[test]
    fn test_dh_rejects_degenerate_public_value() {
        let client = DhKeyPair::generate().unwrap();
        let mut evil = client.public_key();
        evil.y = "1".to_string();
        assert!(matches!(
            client.agree(&evil),
            Err(ProtocolError::KeyAgreement(_))
        ));
    }

    #[test]
    fn test_dh_rejects_small_modulus() {
        let weak = DhPublicKey {
            p: "17".to_string(),
            g: "2".to_string(),
            y: "3".to_string(),
        };
        assert!(DhKeyPair::from_peer(&weak).is_err());
    }

    #[test]
    fn test_dh_rejects_oversized_modulus() {
        let huge = DhPublicKey {
            p: "f".repeat(8192),
            g: "2".to_string(),
            y: "3".to_string(),
        };
        let start = std::time::Instant::now();
        assert!(matches!(
            DhKeyPair::from_peer(&huge),
            Err(ProtocolError::KeyAgreement(_))
        ));
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_dh_rejects_foreign_group_of_same_size() {
        let client = DhKeyPair::generate().unwrap();
        let mut other = client.public_key();
        other.g = "5".to_string();
        assert!(DhKeyPair::from_peer(&other).is_err());

        let mut other = client.public_key();
        other.p = format!("{}1", &MODP_2048_P[..MODP_2048_P.len() - 1]);
        assert!(DhKeyPair::from_peer(&other).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_rsa_roundtrip(text in "\\PC{0,160}") {
            let sealed = rsa_encrypt(&text, &keys().public).unwrap();
            prop_assert_eq!(rsa_decrypt(&sealed, &keys().private).unwrap(), text);
        }
    }
}
