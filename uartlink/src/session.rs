//! Session state consulted on every outgoing write.
//!
//! The session context is owned by the composing caller and shared with the
//! link manager. Key presence is the sole switch between the plaintext and
//! encrypted write paths; the nonce counter advances once per encrypted
//! write and never repeats within a session.

use aes_gcm::{aead::Aead, Aes128Gcm, KeyInit, Nonce};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Outgoing nonce state for the current encryption session.
///
/// A nonce is the 8-byte session id followed by a little-endian message
/// counter, 12 bytes total as AES-GCM expects.
#[derive(Debug, Clone)]
pub struct OutgoingSession {
    session_id: [u8; 8],
    counter: u32,
}

impl OutgoingSession {
    pub fn new(session_id: [u8; 8]) -> Self {
        Self { session_id, counter: 0 }
    }

    /// Consume the next nonce, advancing the counter.
    pub fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.session_id);
        nonce[8..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);
        nonce
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// Device identity and encryption material for the active session.
#[derive(Debug)]
pub struct SessionContext {
    pub device_id: u8,
    pub key: Option<[u8; 16]>,
    pub outgoing: OutgoingSession,
}

impl SessionContext {
    pub fn new(device_id: u8, key: Option<[u8; 16]>) -> Self {
        Self {
            device_id,
            key,
            outgoing: OutgoingSession::new([0u8; 8]),
        }
    }

    /// Install fresh session material, e.g. after a session nonce exchange.
    pub fn reset_session(&mut self, session_id: [u8; 8]) {
        self.outgoing = OutgoingSession::new(session_id);
    }
}

/// Session context as shared with the link manager.
pub type SharedSession = Arc<Mutex<SessionContext>>;

pub fn shared(context: SessionContext) -> SharedSession {
    Arc::new(Mutex::new(context))
}

/// Encryption primitive applied to outgoing packets when a key is present.
pub trait PacketCipher: Send + Sync {
    fn encrypt(&self, key: &[u8; 16], nonce: &[u8; 12], packet: &[u8]) -> Result<Vec<u8>>;
}

/// AES-128-GCM packet encryption.
pub struct AesGcmCipher;

impl PacketCipher for AesGcmCipher {
    fn encrypt(&self, key: &[u8; 16], nonce: &[u8; 12], packet: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128Gcm::new(key.into());
        cipher
            .encrypt(Nonce::from_slice(nonce), packet)
            .map_err(|e| Error::Encryption(e.to_string()))
    }
}
