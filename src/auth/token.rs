//! Bearer token issuance and validation.
//!
//! Tokens are opaque: 32 random bytes, base64url without padding. Only an
//! HMAC-SHA256 digest of the token is used as the store key; the raw token
//! is returned to the caller exactly once and never persisted.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;

use crate::errors::AppError;
use crate::store::keyvalue::{Credential, CredentialStore};

pub const SCOPE_READ: &str = "poll:read";
pub const SCOPE_VOTE: &str = "poll:vote";

pub fn default_scopes() -> Vec<String> {
    vec![SCOPE_READ.to_string(), SCOPE_VOTE.to_string()]
}

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    secret: String,
}

impl TokenService {
    pub fn new(store: Arc<dyn CredentialStore>, secret: impl Into<String>) -> Self {
        Self {
            store,
            secret: secret.into(),
        }
    }

    /// HMAC-SHA256 digest of the raw token, hex-encoded. An empty secret is
    /// a fatal configuration error, raised here rather than at construction.
    fn digest(&self, raw: &str) -> Result<String, AppError> {
        if self.secret.is_empty() {
            return Err(AppError::SecretNotConfigured);
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hmac init: {e}")))?;
        mac.update(raw.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn random_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub async fn issue(
        &self,
        principal_id: i64,
        ttl_secs: u64,
        scopes: Vec<String>,
    ) -> Result<IssuedToken, AppError> {
        let token = Self::random_token();
        let digest = self.digest(&token)?;
        let now = Utc::now().timestamp();
        let cred = Credential {
            principal_id,
            scopes,
            issued_at: now,
            expires_at: now + ttl_secs as i64,
        };
        self.store.put(&digest, &cred, ttl_secs).await?;
        Ok(IssuedToken {
            token,
            expires_in: ttl_secs,
        })
    }

    /// Looks up the credential for a raw token. Returns `TokenNotFound` when
    /// absent or expired, `InsufficientScope` when a required scope is
    /// missing. Never mutates the stored credential.
    pub async fn validate(
        &self,
        raw: &str,
        required_scope: Option<&str>,
    ) -> Result<Credential, AppError> {
        let digest = self.digest(raw)?;
        let cred = self
            .store
            .get(&digest)
            .await?
            .ok_or(AppError::TokenNotFound)?;
        if let Some(scope) = required_scope {
            if !cred.has_scope(scope) {
                return Err(AppError::InsufficientScope);
            }
        }
        Ok(cred)
    }

    /// Deletes the credential. Idempotent: revoking an unknown or already
    /// expired token is a no-op, not an error.
    pub async fn revoke(&self, raw: &str) -> Result<(), AppError> {
        let digest = self.digest(raw)?;
        self.store.delete(&digest).await?;
        Ok(())
    }
}

/// Extracts the bearer token from an `Authorization` header value.
/// Case-sensitive `Bearer ` prefix; surrounding whitespace is trimmed and an
/// empty remainder counts as absent.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keyvalue::MemoryKv;

    fn service(secret: &str) -> TokenService {
        TokenService::new(Arc::new(MemoryKv::new()), secret)
    }

    #[tokio::test]
    async fn issue_then_validate_round_trip() {
        let svc = service("s3cret");
        let issued = svc.issue(7, 3600, default_scopes()).await.unwrap();
        assert_eq!(issued.expires_in, 3600);

        let cred = svc.validate(&issued.token, None).await.unwrap();
        assert_eq!(cred.principal_id, 7);
        assert_eq!(cred.scopes, default_scopes());

        let cred = svc.validate(&issued.token, Some(SCOPE_VOTE)).await.unwrap();
        assert_eq!(cred.principal_id, 7);
    }

    #[tokio::test]
    async fn validate_rejects_unknown_and_expired() {
        let svc = service("s3cret");
        assert!(matches!(
            svc.validate("nope", None).await,
            Err(AppError::TokenNotFound)
        ));

        let issued = svc.issue(1, 0, default_scopes()).await.unwrap();
        assert!(matches!(
            svc.validate(&issued.token, None).await,
            Err(AppError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn validate_enforces_required_scope() {
        let svc = service("s3cret");
        let issued = svc
            .issue(2, 3600, vec![SCOPE_READ.to_string()])
            .await
            .unwrap();
        assert!(matches!(
            svc.validate(&issued.token, Some(SCOPE_VOTE)).await,
            Err(AppError::InsufficientScope)
        ));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let svc = service("s3cret");
        let issued = svc.issue(3, 3600, default_scopes()).await.unwrap();
        svc.revoke(&issued.token).await.unwrap();
        assert!(matches!(
            svc.validate(&issued.token, None).await,
            Err(AppError::TokenNotFound)
        ));
        // revoking again, and revoking garbage, both succeed
        svc.revoke(&issued.token).await.unwrap();
        svc.revoke("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn empty_secret_fails_at_use_time() {
        let svc = service("");
        assert!(matches!(
            svc.issue(1, 60, default_scopes()).await,
            Err(AppError::SecretNotConfigured)
        ));
        assert!(matches!(
            svc.validate("x", None).await,
            Err(AppError::SecretNotConfigured)
        ));
    }

    #[tokio::test]
    async fn tokens_are_unique_and_url_safe() {
        let svc = service("s3cret");
        let a = svc.issue(1, 60, default_scopes()).await.unwrap().token;
        let b = svc.issue(1, 60, default_scopes()).await.unwrap().token;
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // 32 bytes of entropy, base64url without padding
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer   abc  ")), Some("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Bearer    ")), None);
        // prefix is case-sensitive
        assert_eq!(bearer_token(Some("bearer abc")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
