// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Payload Cipher Seam
//!
//! Every role message carries an `is_encrypted` flag. When it is set, the
//! payload fields hold opaque blobs that only the receiving role's enclave can
//! open; when it is clear, the same fields hold plaintext JSON bytes. The
//! record shape is identical in both modes.
//!
//! Key management and the actual cryptography live outside this crate. Roles
//! receive an `Arc<dyn PayloadCipher>` and never look inside a blob they do not
//! own. [`DisabledCipher`] is the default: it accepts plaintext traffic only.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encrypted payloads are not supported by this node")]
    Unavailable,

    #[error("failed to open payload: {0}")]
    Open(String),

    #[error("failed to seal payload: {0}")]
    Seal(String),

    #[error("payload `{field}` is not valid JSON: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode payload `{field}`: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub trait PayloadCipher: Send + Sync {
    fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Rejects every encrypted payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCipher;

impl PayloadCipher for DisabledCipher {
    fn open(&self, _blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Unavailable)
    }

    fn seal(&self, _plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Unavailable)
    }
}

/// Returns the plaintext bytes of a payload field.
pub fn open_bytes(
    cipher: &dyn PayloadCipher,
    is_encrypted: bool,
    payload: &[u8],
) -> Result<Vec<u8>, CipherError> {
    if is_encrypted {
        cipher.open(payload)
    } else {
        Ok(payload.to_vec())
    }
}

/// Opens a payload field and decodes the JSON it carries.
pub fn open_json<T: DeserializeOwned>(
    cipher: &dyn PayloadCipher,
    is_encrypted: bool,
    field: &'static str,
    payload: &[u8],
) -> Result<T, CipherError> {
    let plaintext = open_bytes(cipher, is_encrypted, payload)?;
    serde_json::from_slice(&plaintext).map_err(|source| CipherError::Decode { field, source })
}

/// Encodes a value as JSON and seals it when the message is encrypted.
pub fn seal_json<T: Serialize>(
    cipher: &dyn PayloadCipher,
    is_encrypted: bool,
    field: &'static str,
    value: &T,
) -> Result<Vec<u8>, CipherError> {
    let plaintext =
        serde_json::to_vec(value).map_err(|source| CipherError::Encode { field, source })?;
    if is_encrypted {
        cipher.seal(&plaintext)
    } else {
        Ok(plaintext)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reversible byte mask used to exercise the encrypted code paths.
    #[derive(Debug, Clone, Copy)]
    pub struct MaskCipher(pub u8);

    impl PayloadCipher for MaskCipher {
        fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(blob.iter().map(|b| b ^ self.0).collect())
        }

        fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MaskCipher;
    use super::*;

    #[test]
    fn test_plaintext_passes_through_disabled_cipher() {
        let sealed = seal_json(&DisabledCipher, false, "targets", &vec!["a", "b"]).unwrap();
        assert_eq!(sealed, br#"["a","b"]"#.to_vec());

        let opened: Vec<String> = open_json(&DisabledCipher, false, "targets", &sealed).unwrap();
        assert_eq!(opened, vec!["a", "b"]);
    }

    #[test]
    fn test_disabled_cipher_rejects_encrypted_payloads() {
        let err = open_bytes(&DisabledCipher, true, b"blob").unwrap_err();
        assert!(matches!(err, CipherError::Unavailable));
        assert!(seal_json(&DisabledCipher, true, "targets", &1).is_err());
    }

    #[test]
    fn test_encrypted_round_trip() {
        let cipher = MaskCipher(0x5a);
        let sealed = seal_json(&cipher, true, "targets", &vec!["x"]).unwrap();
        assert_ne!(sealed, br#"["x"]"#.to_vec());

        let opened: Vec<String> = open_json(&cipher, true, "targets", &sealed).unwrap();
        assert_eq!(opened, vec!["x"]);
    }

    #[test]
    fn test_decode_error_names_field() {
        let err = open_json::<Vec<String>>(&DisabledCipher, false, "enc_instances", b"{").unwrap_err();
        assert!(err.to_string().contains("enc_instances"));
    }
}
