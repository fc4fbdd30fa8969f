//! Session-key derivation and authenticated frame encryption.
//!
//! The bridge and the client share a single secret (the authkey). Each
//! session derives a fresh ChaCha20-Poly1305 key via HKDF-SHA256 from the
//! authkey and the salt returned by the bootstrap exchange, bound to the
//! bridge-issued session id. Frames are sealed with a directional counter
//! nonce so the two halves of the duplex never collide.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const SESSION_INFO: &[u8] = b"xc-bridge-session";

/// Errors from key derivation or frame sealing.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("frame authentication failed")]
    AuthFailure,
    #[error("frame encryption failed")]
    SealFailure,
}

/// Which half of the duplex a frame belongs to. The byte is folded into
/// the nonce so a reflected frame never authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    ToBridge = 0x01,
    FromBridge = 0x02,
}

/// Symmetric material for one session: AEAD key plus the base nonce both
/// directions perturb with their counters.
#[derive(Clone)]
pub struct SessionKeys {
    key: [u8; KEY_LEN],
    base_nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Derives the session material from the authkey, the server salt and
    /// the session id announced during bootstrap.
    pub fn derive(authkey: &str, salt: &[u8], session_id: &Uuid) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), authkey.as_bytes());
        let mut info = Vec::with_capacity(SESSION_INFO.len() + 16);
        info.extend_from_slice(SESSION_INFO);
        info.extend_from_slice(session_id.as_bytes());

        let mut okm = [0u8; KEY_LEN + NONCE_LEN];
        hk.expand(&info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;

        let mut key = [0u8; KEY_LEN];
        let mut base_nonce = [0u8; NONCE_LEN];
        key.copy_from_slice(&okm[..KEY_LEN]);
        base_nonce.copy_from_slice(&okm[KEY_LEN..]);
        Ok(Self { key, base_nonce })
    }

    fn nonce_for(&self, direction: Direction, counter: u64) -> [u8; NONCE_LEN] {
        let mut nonce = self.base_nonce;
        nonce[0] ^= direction as u8;
        for (slot, byte) in nonce[4..12].iter_mut().zip(counter.to_be_bytes()) {
            *slot ^= byte;
        }
        nonce
    }

    /// Seals a plaintext frame body, returning ciphertext with the Poly1305
    /// tag appended.
    pub fn seal(
        &self,
        direction: Direction,
        counter: u64,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.nonce_for(direction, counter);
        cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::SealFailure)
    }

    /// Opens a sealed frame body. Any mismatch of key, counter, direction,
    /// associated data or tag yields `AuthFailure`.
    pub fn open(
        &self,
        direction: Direction,
        counter: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.nonce_for(direction, counter);
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::AuthFailure)
    }
}

/// Proof sent with the bootstrap request: hex SHA-256 over the client
/// nonce and the authkey. The bridge recomputes it server-side.
pub fn auth_proof(authkey: &str, client_nonce: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_nonce);
    hasher.update(authkey.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
