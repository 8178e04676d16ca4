//! Token encryption module using AES-256-GCM
//!
//! Access and refresh tokens are encrypted before they reach the database,
//! using AES-256-GCM with additional authenticated data (AAD) so a ciphertext
//! only decrypts for the `user_id`/`provider` pair it was written for.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::Provider;
use crate::models::oauth_token::Model as OAuthTokenModel;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AAD binding a ciphertext to the row that owns it.
fn token_aad(user_id: Uuid, provider: &str) -> String {
    format!("{user_id}|{provider}")
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    // Fresh random nonce per encryption
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Payload layout: version byte || nonce || ciphertext+tag
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Legacy plaintext payloads carry no version marker
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Ok(ciphertext.to_vec());
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let ct_and_tag = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ct_and_tag,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// Type alias for encrypted token result
type EncryptedTokens = Result<(Vec<u8>, Option<Vec<u8>>), CryptoError>;

/// Encrypt an access/refresh token pair for storage.
pub fn encrypt_token_pair(
    key: &CryptoKey,
    user_id: Uuid,
    provider: Provider,
    access_token: &str,
    refresh_token: Option<&str>,
) -> EncryptedTokens {
    let aad = token_aad(user_id, provider.as_str());

    let access_token_ciphertext = encrypt_bytes(key, aad.as_bytes(), access_token.as_bytes())?;
    let refresh_token_ciphertext = refresh_token
        .map(|token| encrypt_bytes(key, aad.as_bytes(), token.as_bytes()))
        .transpose()?;

    Ok((access_token_ciphertext, refresh_token_ciphertext))
}

/// Type alias for decrypted token result
type DecryptedTokens = Result<(String, Option<String>), CryptoError>;

/// Decrypt the token pair stored on an `oauth_tokens` row.
pub fn decrypt_token_pair(key: &CryptoKey, token: &OAuthTokenModel) -> DecryptedTokens {
    let aad = token_aad(token.user_id, &token.provider);

    let access_token = decrypt_utf8(key, aad.as_bytes(), &token.access_token_ciphertext)?;
    let refresh_token = token
        .refresh_token_ciphertext
        .as_deref()
        .map(|ciphertext| decrypt_utf8(key, aad.as_bytes(), ciphertext))
        .transpose()?;

    Ok((access_token, refresh_token))
}

fn decrypt_utf8(key: &CryptoKey, aad: &[u8], ciphertext: &[u8]) -> Result<String, CryptoError> {
    if is_encrypted_payload(ciphertext) {
        let bytes = decrypt_bytes(key, aad, ciphertext)?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    } else {
        String::from_utf8(ciphertext.to_vec())
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    fn sample_token_model(
        user_id: Uuid,
        access_token_ciphertext: Vec<u8>,
        refresh_token_ciphertext: Option<Vec<u8>>,
    ) -> OAuthTokenModel {
        OAuthTokenModel {
            id: Uuid::new_v4(),
            user_id,
            provider: Provider::Google.as_str().to_string(),
            status: "active".to_string(),
            token_type: "Bearer".to_string(),
            scope: String::new(),
            access_token_ciphertext,
            refresh_token_ciphertext,
            expires_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, b"user-a|google", plaintext).expect("encryption succeeds");
        let result = decrypt_bytes(&key, b"user-b|google", &encrypted);

        assert!(result.is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let mut encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        // Flip a byte past the nonce
        encrypted[13] ^= 0x01;

        let result = decrypt_bytes(&key, aad, &encrypted);
        assert!(result.is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted1 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let encrypted2 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");

        // Nonces (bytes 1-13) should be different
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
        let decrypted1 = decrypt_bytes(&key, aad, &encrypted1).expect("decryption succeeds");
        let decrypted2 = decrypt_bytes(&key, aad, &encrypted2).expect("decryption succeeds");
        assert_eq!(decrypted1, plaintext);
        assert_eq!(decrypted2, plaintext);
    }

    #[test]
    fn test_legacy_token_passthrough() {
        let key = test_key();
        let aad = b"test-aad";
        let legacy_ciphertext = b"legacy-token".to_vec(); // No version marker

        let result =
            decrypt_bytes(&key, aad, &legacy_ciphertext).expect("legacy plaintext is returned");
        assert_eq!(result, legacy_ciphertext);
    }

    #[test]
    fn test_is_encrypted_payload_detection() {
        let key = test_key();
        let aad = b"test-aad";
        let encrypted = encrypt_bytes(&key, aad, b"secret").expect("encryption succeeds");

        assert!(is_encrypted_payload(&encrypted));
        assert!(!is_encrypted_payload(b"legacy"));
    }

    #[test]
    fn test_token_pair_roundtrip_through_model() {
        let key = test_key();
        let user_id = Uuid::new_v4();

        let (access_ct, refresh_ct) = encrypt_token_pair(
            &key,
            user_id,
            Provider::Google,
            "access-abc",
            Some("refresh-xyz"),
        )
        .expect("encryption succeeds");

        let model = sample_token_model(user_id, access_ct, refresh_ct);
        let (access, refresh) = decrypt_token_pair(&key, &model).expect("decryption succeeds");

        assert_eq!(access, "access-abc");
        assert_eq!(refresh.as_deref(), Some("refresh-xyz"));
    }

    #[test]
    fn test_token_pair_bound_to_user() {
        let key = test_key();
        let user_id = Uuid::new_v4();

        let (access_ct, _) =
            encrypt_token_pair(&key, user_id, Provider::Google, "access-abc", None)
                .expect("encryption succeeds");

        // Same ciphertext attributed to a different user must not decrypt
        let model = sample_token_model(Uuid::new_v4(), access_ct, None);
        assert!(decrypt_token_pair(&key, &model).is_err());
    }

    #[test]
    fn test_decrypt_token_pair_handles_legacy_plaintext() {
        let key = test_key();
        let user_id = Uuid::new_v4();
        let aad = token_aad(user_id, Provider::Google.as_str());

        let refresh_ciphertext =
            encrypt_bytes(&key, aad.as_bytes(), b"refresh-token").expect("encryption succeeds");
        let model = sample_token_model(
            user_id,
            b"legacy-access".to_vec(),
            Some(refresh_ciphertext),
        );

        let (access, refresh) = decrypt_token_pair(&key, &model).expect("decryption succeeds");

        assert_eq!(access, "legacy-access");
        assert_eq!(refresh.as_deref(), Some("refresh-token"));
    }

    #[test]
    fn test_missing_refresh_token_stays_absent() {
        let key = test_key();
        let user_id = Uuid::new_v4();

        let (access_ct, refresh_ct) =
            encrypt_token_pair(&key, user_id, Provider::Microsoft, "access-abc", None)
                .expect("encryption succeeds");
        assert!(refresh_ct.is_none());

        let mut model = sample_token_model(user_id, access_ct, None);
        model.provider = Provider::Microsoft.as_str().to_string();

        let (_, refresh) = decrypt_token_pair(&key, &model).expect("decryption succeeds");
        assert!(refresh.is_none());
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        let result = CryptoKey::new(vec![0u8; 16]); // Too short
        assert!(result.is_err());

        let result = CryptoKey::new(vec![0u8; 64]); // Too long
        assert!(result.is_err());
    }

    #[test]
    fn test_insufficient_ciphertext_length() {
        let key = test_key();
        let aad = b"test-aad";
        let short_ciphertext = vec![VERSION_ENCRYPTED, 0x02]; // Too short for nonce + tag

        let result = decrypt_bytes(&key, aad, &short_ciphertext);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }
}
