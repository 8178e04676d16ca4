//! Signed OAuth state tokens
//!
//! The authorization redirect carries `userId|issuedAtEpoch[|region]` signed
//! with HMAC-SHA256, so the callback can trust which user the grant binds to
//! without server-side session state. Comparison is constant-time and a
//! state older than ten minutes is refused.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age before an issued state is refused
const STATE_MAX_AGE_SECS: i64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("state signing secret rejected")]
    InvalidSecret,
    #[error("malformed state token")]
    Malformed,
    #[error("state token signature mismatch")]
    BadSignature,
    #[error("state token expired ({age_secs}s old)")]
    Expired { age_secs: i64 },
}

/// Contents of a verified state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateClaims {
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub region: Option<String>,
}

/// Issues and verifies the signed state carried through OAuth redirects.
#[derive(Clone)]
pub struct StateTokenSigner {
    mac: HmacSha256,
}

impl StateTokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, StateTokenError> {
        let mac =
            HmacSha256::new_from_slice(secret).map_err(|_| StateTokenError::InvalidSecret)?;
        Ok(Self { mac })
    }

    /// Mint a signed state bound to `user_id`, stamped with the current time.
    pub fn issue(&self, user_id: Uuid, region: Option<&str>) -> String {
        self.issue_at(user_id, region, Utc::now())
    }

    fn issue_at(&self, user_id: Uuid, region: Option<&str>, now: DateTime<Utc>) -> String {
        let mut payload = format!("{}|{}", user_id, now.timestamp());
        if let Some(region) = region {
            payload.push('|');
            payload.push_str(region);
        }
        let signature = self.sign(payload.as_bytes());
        format!(
            "{}.{}",
            base64_url::encode(&payload),
            base64_url::encode(&signature)
        )
    }

    /// Verify signature and age, returning the claims the state carries.
    pub fn verify(&self, token: &str) -> Result<StateClaims, StateTokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<StateClaims, StateTokenError> {
        let (payload_part, signature_part) =
            token.split_once('.').ok_or(StateTokenError::Malformed)?;
        let payload = base64_url::decode(payload_part).map_err(|_| StateTokenError::Malformed)?;
        let provided = base64_url::decode(signature_part).map_err(|_| StateTokenError::Malformed)?;

        // Signature first, in constant time, before anything is parsed out
        // of the payload
        let expected = self.sign(&payload);
        if !bool::from(subtle::ConstantTimeEq::ct_eq(
            expected.as_slice(),
            provided.as_slice(),
        )) {
            return Err(StateTokenError::BadSignature);
        }

        let payload = String::from_utf8(payload).map_err(|_| StateTokenError::Malformed)?;
        let mut parts = payload.split('|');
        let user_id: Uuid = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(StateTokenError::Malformed)?;
        let issued_epoch: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(StateTokenError::Malformed)?;
        let region = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(StateTokenError::Malformed);
        }

        let issued_at =
            DateTime::<Utc>::from_timestamp(issued_epoch, 0).ok_or(StateTokenError::Malformed)?;
        let age_secs = (now - issued_at).num_seconds();
        if age_secs > STATE_MAX_AGE_SECS {
            return Err(StateTokenError::Expired { age_secs });
        }

        Ok(StateClaims {
            user_id,
            issued_at,
            region,
        })
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}
