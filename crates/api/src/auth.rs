//! Bearer-token authentication.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use common::{Actor, Role};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

const MISSING_HEADER: &str = "Authorization header missing";
const INVALID_TOKEN: &str = "Invalid or expired token";

/// Token claims. The user id is taken from `id`, `userId` or `sub`, in
/// that order; ids may be strings or numbers.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl Claims {
    /// Claims naming `actor`, expiring at `exp` (seconds since the epoch).
    pub fn for_actor(actor: &Actor, exp: u64) -> Self {
        Self {
            id: Some(Value::String(actor.user_id.to_string())),
            role: Some(actor.role.as_str().to_string()),
            exp: Some(exp),
            ..Self::default()
        }
    }

    fn subject(&self) -> Option<String> {
        [&self.id, &self.user_id, &self.sub]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// HS256 signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required.
        validation.required_spec_claims.clear();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs a token for `claims`.
    pub fn issue(&self, claims: &Claims) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Verifies a token and resolves the actor it names.
    pub fn verify(&self, token: &str) -> Result<Actor, ApiError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                ApiError::Unauthorized(INVALID_TOKEN)
            })?;

        let user_id = data
            .claims
            .subject()
            .ok_or(ApiError::Unauthorized(INVALID_TOKEN))?;
        Ok(Actor::new(user_id, Role::from_claim(data.claims.role.as_deref())))
    }
}

impl std::fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys").finish_non_exhaustive()
    }
}

/// Extractor for the authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Actor);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(ApiError::Unauthorized(MISSING_HEADER))?
            .to_str()
            .map_err(|_| ApiError::Unauthorized(INVALID_TOKEN))?;

        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        state.tokens.verify(token).map(CurrentUser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_future() -> u64 {
        (chrono::Utc::now().timestamp() + 3600) as u64
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = TokenKeys::new("secret");
        let token = keys
            .issue(&Claims::for_actor(&Actor::admin("root"), far_future()))
            .unwrap();

        let actor = keys.verify(&token).unwrap();
        assert_eq!(actor, Actor::admin("root"));
    }

    #[test]
    fn test_user_id_claim_precedence() {
        let keys = TokenKeys::new("secret");
        let claims = Claims {
            user_id: Some(Value::from(42)),
            sub: Some(Value::from("ignored")),
            ..Claims::default()
        };
        let token = keys.issue(&claims).unwrap();

        let actor = keys.verify(&token).unwrap();
        assert_eq!(actor.user_id.as_str(), "42");
        assert_eq!(actor.role, Role::User);
    }

    #[test]
    fn test_rejects_wrong_secret_expired_or_anonymous() {
        let keys = TokenKeys::new("secret");
        let other = TokenKeys::new("other-secret");

        let forged = other
            .issue(&Claims::for_actor(&Actor::user("alice"), far_future()))
            .unwrap();
        let expired = keys
            .issue(&Claims::for_actor(&Actor::user("alice"), 1_000))
            .unwrap();
        let anonymous = keys
            .issue(&Claims {
                role: Some("admin".to_string()),
                ..Claims::default()
            })
            .unwrap();

        for token in [forged, expired, anonymous, "garbage".to_string()] {
            assert!(matches!(
                keys.verify(&token),
                Err(ApiError::Unauthorized(INVALID_TOKEN))
            ));
        }
    }
}
