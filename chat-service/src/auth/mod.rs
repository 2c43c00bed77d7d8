//! Identity verification, consumed through a narrow interface.
//!
//! Token minting, password hashing and login flows live in the identity
//! service; this side only verifies what it is handed.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::SharedStore;
use crate::error::{AppError, AppResult};

/// The authenticated caller attached to each request/connection.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub session_id: Uuid,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> AppResult<AuthContext>;

    /// Whether the session is still live (not revoked by a logout or an
    /// administrative kill).
    async fn is_session_active(&self, user_id: Uuid, session_id: Uuid) -> AppResult<bool>;
}

pub type SharedVerifier = Arc<dyn IdentityVerifier>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
}

/// HS256 verifier. Session revocation is a shared-store lookup so a logout
/// on any instance takes effect everywhere.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    store: SharedStore,
}

fn revoked_session_key(session_id: Uuid) -> String {
    format!("session:revoked:{session_id}")
}

impl JwtVerifier {
    pub fn new(secret: &str, store: SharedStore) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            store,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> AppResult<AuthContext> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| AppError::Authentication)?;

        let user_id =
            Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Authentication)?;
        let session_id =
            Uuid::parse_str(&data.claims.sid).map_err(|_| AppError::Authentication)?;

        if !self.is_session_active(user_id, session_id).await? {
            return Err(AppError::Authentication);
        }

        Ok(AuthContext {
            user_id,
            username: data.claims.username,
            email: data.claims.email,
            session_id,
        })
    }

    async fn is_session_active(&self, _user_id: Uuid, session_id: Uuid) -> AppResult<bool> {
        let revoked = self.store.get(&revoked_session_key(session_id)).await?;
        Ok(revoked.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryStore;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, user_id: Uuid, session_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            username: "alice".into(),
            email: Some("alice@example.com".into()),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn valid_token_verifies() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let verifier = JwtVerifier::new("secret", store);
        let user_id = Uuid::new_v4();
        let ctx = verifier
            .verify(&token("secret", user_id, Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.username, "alice");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let verifier = JwtVerifier::new("secret", store);
        let err = verifier
            .verify(&token("other", Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication));
    }

    #[tokio::test]
    async fn revoked_session_is_rejected() {
        let store: SharedStore = Arc::new(InMemoryStore::new());
        let verifier = JwtVerifier::new("secret", Arc::clone(&store));
        let session_id = Uuid::new_v4();
        store
            .set(&revoked_session_key(session_id), "1", None)
            .await
            .unwrap();

        let err = verifier
            .verify(&token("secret", Uuid::new_v4(), session_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication));
    }
}
