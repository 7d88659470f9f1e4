//! Integration tests for the token service, rate limiter and results cache
//! against the in-memory stores. The Postgres-backed vote path is covered
//! by the unique constraint in migrations plus the SQLSTATE translation
//! tested in the vote module; nothing here needs external services.

use std::sync::Arc;

use pollserv::auth::token::{bearer_token, default_scopes, TokenService, SCOPE_READ, SCOPE_VOTE};
use pollserv::cache::{results_key, ResultsCache};
use pollserv::errors::AppError;
use pollserv::ratelimit::RateLimiter;
use pollserv::store::keyvalue::{Credential, CredentialStore, MemoryKv};

fn token_service() -> TokenService {
    TokenService::new(Arc::new(MemoryKv::new()), "integration-secret")
}

mod token_lifecycle {
    use super::*;

    /// Principal 7 logs in, gets a token with vote scope and 3600s TTL, and
    /// the token round-trips through validation with matching claims.
    #[tokio::test]
    async fn issue_validate_revoke_flow() {
        let svc = token_service();

        let issued = svc.issue(7, 3600, default_scopes()).await.unwrap();
        assert_eq!(issued.expires_in, 3600);

        let cred = svc.validate(&issued.token, Some(SCOPE_VOTE)).await.unwrap();
        assert_eq!(cred.principal_id, 7);
        assert!(cred.has_scope(SCOPE_READ));
        assert!(cred.expires_at > cred.issued_at);

        svc.revoke(&issued.token).await.unwrap();
        assert!(matches!(
            svc.validate(&issued.token, None).await,
            Err(AppError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn revoke_twice_and_revoke_unknown_are_noops() {
        let svc = token_service();
        let issued = svc.issue(1, 60, default_scopes()).await.unwrap();
        svc.revoke(&issued.token).await.unwrap();
        svc.revoke(&issued.token).await.unwrap();
        svc.revoke("token-that-never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_is_not_found() {
        let svc = token_service();
        let issued = svc.issue(2, 0, default_scopes()).await.unwrap();
        assert!(matches!(
            svc.validate(&issued.token, None).await,
            Err(AppError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn scope_is_enforced_but_credential_is_not_mutated() {
        let svc = token_service();
        let issued = svc
            .issue(3, 3600, vec![SCOPE_READ.to_string()])
            .await
            .unwrap();

        assert!(matches!(
            svc.validate(&issued.token, Some(SCOPE_VOTE)).await,
            Err(AppError::InsufficientScope)
        ));
        // a failed scope check does not consume or alter the credential
        let cred = svc.validate(&issued.token, Some(SCOPE_READ)).await.unwrap();
        assert_eq!(cred.scopes, vec![SCOPE_READ.to_string()]);
    }

    #[tokio::test]
    async fn raw_token_is_never_a_store_key() {
        let store = Arc::new(MemoryKv::new());
        let svc = TokenService::new(store.clone(), "integration-secret");
        let issued = svc.issue(4, 60, default_scopes()).await.unwrap();

        // looking the raw token up directly must miss: only the digest is
        // a valid key
        assert!(store.get(&issued.token).await.unwrap().is_none());
        assert!(svc.validate(&issued.token, None).await.is_ok());
    }

    #[test]
    fn bearer_header_parsing_edge_cases() {
        assert_eq!(bearer_token(Some("Bearer tok123")), Some("tok123"));
        assert_eq!(bearer_token(Some("Bearer  padded ")), Some("padded"));
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("bearer tok")), None);
        assert_eq!(bearer_token(Some("")), None);
        assert_eq!(bearer_token(None), None);
    }
}

mod rate_limiting {
    use super::*;

    /// 11 rapid attempts with max=10: the 11th is rejected, whatever the
    /// target option was.
    #[tokio::test]
    async fn eleventh_attempt_is_rejected() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()));
        let key = "vote:uid:7:q:5";
        for _ in 0..10 {
            assert!(limiter.allow(key, 10, 3600).await.unwrap());
        }
        assert!(!limiter.allow(key, 10, 3600).await.unwrap());
    }

    /// A burst of max + k attempts admits exactly max, across concurrent
    /// tasks and regardless of interleaving.
    #[tokio::test]
    async fn concurrent_burst_admits_exactly_max() {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryKv::new())));
        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.allow("vote:uid:9:q:2", 10, 3600).await.unwrap()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn quotas_are_per_action_key() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()));
        for q in 1..=3 {
            let key = format!("vote:uid:7:q:{}", q);
            assert!(limiter.allow(&key, 1, 3600).await.unwrap());
            assert!(!limiter.allow(&key, 1, 3600).await.unwrap());
        }
    }
}

mod results_cache {
    use super::*;

    #[tokio::test]
    async fn vote_invalidation_clears_cached_results() {
        let cache = ResultsCache::local_only();
        let key = results_key(5);
        let body = serde_json::json!({
            "results": { "total_votes": 12 }
        });
        cache.set(&key, &body, 30).await.unwrap();
        assert!(cache.get::<serde_json::Value>(&key).await.is_some());

        cache.invalidate(&key).await;
        assert!(cache.get::<serde_json::Value>(&key).await.is_none());
        // other questions keep their entries
        let other = results_key(6);
        cache.set(&other, &body, 30).await.unwrap();
        cache.invalidate(&key).await;
        assert!(cache.get::<serde_json::Value>(&other).await.is_some());
    }
}

mod credential_store {
    use super::*;

    #[tokio::test]
    async fn credentials_round_trip_as_json() {
        let store = MemoryKv::new();
        let cred = Credential {
            principal_id: 42,
            scopes: default_scopes(),
            issued_at: 1_700_000_000,
            expires_at: 1_700_003_600,
        };
        store.put("digest-a", &cred, 60).await.unwrap();
        assert_eq!(store.get("digest-a").await.unwrap(), Some(cred));
        assert_eq!(store.get("digest-b").await.unwrap(), None);
    }
}
