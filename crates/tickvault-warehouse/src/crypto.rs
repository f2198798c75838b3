//! AES-256-GCM sealing of partition rows.
//!
//! Primary-key columns stay in clear; the remaining row payload is sealed
//! per row with a random 96-bit nonce and bound to the partition id and the
//! row key through the associated data.

use std::fmt::{Debug, Formatter};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;

use crate::WarehouseError;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Partition encryption key. Never persisted; supplied by configuration.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WarehouseError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            WarehouseError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Decode a base64 (standard alphabet) key.
    pub fn from_base64(encoded: &str) -> Result<Self, WarehouseError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|error| WarehouseError::Encryption(format!("invalid key base64: {error}")))?;
        Self::from_bytes(&bytes)
    }

    /// Fresh random key, base64 encoded.
    pub fn generate_base64() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        base64::engine::general_purpose::STANDARD.encode(key.as_slice())
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Seals and opens row payloads for one key.
#[derive(Clone)]
pub struct RowCipher {
    cipher: Aes256Gcm,
}

impl Debug for RowCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RowCipher")
    }
}

/// Sealed row payload as stored in the partition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRow {
    pub nonce: Vec<u8>,
    pub payload: Vec<u8>,
}

impl RowCipher {
    pub fn new(key: &EncryptionKey) -> Result<Self, WarehouseError> {
        let cipher = Aes256Gcm::new_from_slice(&key.0)
            .map_err(|error| WarehouseError::Encryption(error.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<SealedRow, WarehouseError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|error| WarehouseError::Encryption(error.to_string()))?;
        Ok(SealedRow {
            nonce: nonce.to_vec(),
            payload,
        })
    }

    /// Open a sealed row. `None` when authentication fails.
    pub fn open(&self, aad: &[u8], row: &SealedRow) -> Option<Vec<u8>> {
        if row.nonce.len() != NONCE_SIZE {
            return None;
        }
        let nonce = Nonce::from_slice(&row.nonce);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &row.payload,
                    aad,
                },
            )
            .ok()
    }
}

/// Associated data binding a sealed row to its partition and key.
pub fn row_aad(partition_id: &str, row_key: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(partition_id.len() + row_key.len() + 1);
    aad.extend_from_slice(partition_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(row_key.as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> RowCipher {
        let key = EncryptionKey::from_base64(&EncryptionKey::generate_base64()).expect("key");
        RowCipher::new(&key).expect("cipher")
    }

    #[test]
    fn sealed_row_opens_with_matching_aad() {
        let cipher = cipher();
        let aad = row_aad("SPY:bars_1d:2024-01-01:2024-12-31", "1705276800");
        let sealed = cipher.seal(&aad, b"payload").expect("seal");
        assert_eq!(cipher.open(&aad, &sealed).as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn sealed_row_moved_to_another_key_fails_authentication() {
        let cipher = cipher();
        let sealed = cipher
            .seal(&row_aad("p", "1705276800"), b"payload")
            .expect("seal");
        assert!(cipher.open(&row_aad("p", "1705276860"), &sealed).is_none());
    }

    #[test]
    fn short_keys_are_rejected() {
        let error = EncryptionKey::from_bytes(&[0u8; 16]).expect_err("must reject");
        assert!(matches!(error, WarehouseError::Encryption(_)));
    }

    #[test]
    fn debug_output_redacts_key() {
        let key = EncryptionKey::from_bytes(&[7u8; 32]).expect("key");
        assert_eq!(format!("{key:?}"), "EncryptionKey(<redacted>)");
    }
}
