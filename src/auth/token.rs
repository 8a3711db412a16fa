//! Client-facing token sealing and opening
//!
//! The proxy issues opaque tokens that embed the raw bearer token returned
//! by an upstream token service. Tokens are a JSON claims object encrypted
//! with XChaCha20-Poly1305 under the process secret key, with the 24-byte
//! nonce prepended and the whole encoded as URL-safe unpadded base64.
//! Authenticity and the `nbf`/`exp` window are enforced when opening.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Size of the symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
const NONCE_SIZE: usize = 24;

/// Symmetric key material for the token cipher.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Decode a hex-encoded 32-byte key, as carried in the configuration.
    pub fn from_hex(hex_key: &str) -> Result<Self, TokenError> {
        let decoded = hex::decode(hex_key)
            .map_err(|e| TokenError::InvalidKey(format!("not valid hex: {}", e)))?;
        if decoded.len() != KEY_SIZE {
            return Err(TokenError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }
}

/// Claims carried inside a sealed token, as unix-second timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(
        rename = "upstream-token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub upstream_token: Option<String>,
}

/// Seals upstream tokens into client-facing tokens and opens them again.
pub struct TokenCipher {
    cipher: XChaCha20Poly1305,
}

impl TokenCipher {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(&key.bytes)),
        }
    }

    /// Seal an upstream token into a client-facing token.
    ///
    /// `now` becomes both `iat` and `nbf`; `expires_at` becomes `exp`.
    pub fn seal(
        &self,
        upstream_token: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        self.seal_claims(&Claims {
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            upstream_token: Some(upstream_token.to_string()),
        })
    }

    pub(crate) fn seal_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        let plaintext = serde_json::to_vec(claims)
            .map_err(|e| TokenError::Invalid(format!("claims serialization failed: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| TokenError::Invalid(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a client-facing token and return the embedded upstream token.
    ///
    /// Fails when the token was tampered with, is not yet valid, or has
    /// expired.
    pub fn open(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.open_claims(token)?;

        let now = Utc::now().timestamp();
        if now < claims.nbf {
            return Err(TokenError::Invalid("token is not yet valid".to_string()));
        }
        if now > claims.exp {
            return Err(TokenError::Invalid("token has expired".to_string()));
        }

        claims.upstream_token.ok_or(TokenError::ClaimsMissing)
    }

    pub(crate) fn open_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let data = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| TokenError::Invalid(format!("not valid base64: {}", e)))?;

        if data.len() < NONCE_SIZE {
            return Err(TokenError::Invalid("token too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TokenError::Invalid("authentication failed".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| TokenError::Invalid(format!("claims decoding failed: {}", e)))
    }
}
