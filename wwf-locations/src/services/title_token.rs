//! Obfuscated title tokens
//!
//! Token format: `base64url(payload_json).base64url(hmac_sha256(payload_b64))`
//! where the payload is `{"v":"v1","imdbId":"tt…","exp":<unix seconds>}`.
//!
//! Tokens are stable within a time bucket of `max(60, ttl)` seconds and expire
//! at the end of the bucket they were issued in. Signatures are checked in
//! constant time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::types::TitleId;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const MIN_BUCKET_SECONDS: u64 = 60;

/// Token verification failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token secret not configured")]
    NoSecret,

    #[error("Malformed token")]
    Malformed,

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Unsupported token version")]
    UnsupportedVersion,

    #[error("Token payload does not carry a title id")]
    InvalidTitleId,

    #[error("Token expired at {0}")]
    Expired(i64),
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    v: String,
    #[serde(rename = "imdbId")]
    imdb_id: String,
    exp: i64,
}

/// Verified token contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub title_id: TitleId,
    pub expires_at: i64,
}

/// HMAC signer/verifier for title tokens
#[derive(Clone)]
pub struct TokenSigner {
    secret: Option<Vec<u8>>,
    bucket_seconds: u64,
}

impl TokenSigner {
    pub fn new(secret: Option<String>, ttl_seconds: u64) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.trim().is_empty())
                .map(String::into_bytes),
            bucket_seconds: ttl_seconds.max(MIN_BUCKET_SECONDS),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Issue a token for `title_id` valid until the end of the current bucket
    pub fn sign(&self, title_id: &TitleId) -> Option<String> {
        self.sign_at(title_id, chrono::Utc::now().timestamp())
    }

    pub fn sign_at(&self, title_id: &TitleId, now: i64) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let bucket_size = self.bucket_seconds as i64;
        let bucket = now.div_euclid(bucket_size);
        let payload = TokenPayload {
            v: TOKEN_VERSION.to_string(),
            imdb_id: title_id.as_str().to_string(),
            exp: (bucket + 1) * bucket_size,
        };

        let json = serde_json::to_vec(&payload).ok()?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(payload_b64.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Some(format!("{}.{}", payload_b64, sig))
    }

    /// Verify a token against the current time
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<VerifiedToken, TokenError> {
        let secret = self.secret.as_deref().ok_or(TokenError::NoSecret)?;

        let (payload_b64, sig_b64) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if payload_b64.is_empty() || sig_b64.is_empty() || sig_b64.contains('.') {
            return Err(TokenError::Malformed);
        }

        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64.as_bytes())
            .map_err(|_| TokenError::BadSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::NoSecret)?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload_b64.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let payload: TokenPayload =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if payload.v != TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion);
        }
        let title_id = TitleId::parse(&payload.imdb_id).ok_or(TokenError::InvalidTitleId)?;
        if now > payload.exp {
            return Err(TokenError::Expired(payload.exp));
        }

        Ok(VerifiedToken {
            title_id,
            expires_at: payload.exp,
        })
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("configured", &self.secret.is_some())
            .field("bucket_seconds", &self.bucket_seconds)
            .finish()
    }
}
