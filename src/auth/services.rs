pub(crate) use crate::auth::dto::{Claims, JwtKeys, PublicUser, TokenKind};
use crate::config::{AdminConfig, JwtConfig};
use crate::state::AppState;
use crate::storage::types::{NewUser, Role, User, UserKind, ITEM_LIMIT_DEFAULT};
use crate::storage::Storage;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{async_trait, extract::{FromRef, FromRequestParts}, http::{header, request::Parts, StatusCode}};
use jsonwebtoken::{decode, encode, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

type ApiError = (StatusCode, String);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Argon2id PHC string with a fresh salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))
}

/// `Ok(false)` on a mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| anyhow::anyhow!("stored hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Creates the configured administrator unless an admin already exists.
pub async fn ensure_default_admin(storage: &Storage, admin: &AdminConfig) -> anyhow::Result<()> {
    if storage.list_users().await?.iter().any(User::is_admin) {
        debug!("administrator present");
        return Ok(());
    }
    let user = storage
        .create_user(NewUser {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password_hash: hash_password(&admin.password)?,
            is_active: true,
            kind: UserKind::Owner {
                role: Role::Admin,
                item_limit: ITEM_LIMIT_DEFAULT,
                has_unlimited: true,
            },
        })
        .await?;
    info!(user_id = %user.id, username = %user.username, "default administrator created");
    Ok(())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        let minutes = |m: i64| Duration::from_secs(m.max(0) as u64 * 60);
        Self {
            encoding: jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
            decoding: jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: minutes(ttl_minutes),
            refresh_ttl: minutes(refresh_ttl_minutes),
        }
    }
}

impl JwtKeys {
    /// HS256 token for an account id (`U…` or `G…`).
    pub fn sign(&self, account_id: &str, kind: TokenKind) -> anyhow::Result<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = Claims {
            sub: account_id.to_string(),
            iat,
            exp: iat + ttl.as_secs() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Checks signature, expiry, issuer, audience and token kind.
    pub fn verify(&self, token: &str, kind: TokenKind) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.kind != kind {
            anyhow::bail!("expected a {kind:?} token");
        }
        Ok(claims)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or((StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()))
}

/// The caller's stored account, resolved from an access token. Deleted
/// accounts are 401, deactivated ones 403.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = JwtKeys::from_ref(state)
            .verify(token, TokenKind::Access)
            .map_err(|e| {
                warn!(error = %e, "access token rejected");
                (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
            })?;
        let user = state
            .storage
            .find_user_by_id(&claims.sub)
            .await?
            .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;
        if !user.is_active {
            warn!(user_id = %user.id, "inactive account rejected");
            return Err((StatusCode::FORBIDDEN, "Account is disabled".to_string()));
        }
        Ok(CurrentUser(user))
    }
}

pub fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "Admin access required".to_string()))
    }
}

pub fn require_owner(user: &User) -> Result<(), ApiError> {
    if user.is_guest() {
        Err((StatusCode::FORBIDDEN, "Guests cannot manage guests".to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    async fn extract(state: &AppState, authorization: Option<String>) -> Result<User, ApiError> {
        let mut builder = Request::builder().uri("/api/inventory");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CurrentUser::from_request_parts(&mut parts, state)
            .await
            .map(|CurrentUser(u)| u)
    }

    #[test]
    fn passwords_verify_only_against_their_hash() {
        let hash = hash_password("shelf-stock-42").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("shelf-stock-42", &hash).unwrap());
        assert!(!verify_password("shelf-stock-43", &hash).unwrap());
        assert!(verify_password("shelf-stock-42", "plain-text").is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("alice@x.com"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("a b@x.com"));
    }

    #[test]
    fn tokens_carry_account_id_and_kind() {
        let keys = keys();
        let access = keys.sign("G1704067200001", TokenKind::Access).unwrap();
        let claims = keys.verify(&access, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "G1704067200001");
        assert_eq!((claims.iss.as_str(), claims.aud.as_str()), ("test", "test"));
        assert!(keys.verify(&access, TokenKind::Refresh).is_err());

        let refresh = keys.sign("U1", TokenKind::Refresh).unwrap();
        assert!(keys.verify(&refresh, TokenKind::Access).is_err());
        assert_eq!(keys.verify(&refresh, TokenKind::Refresh).unwrap().sub, "U1");

        let mut foreign = self::keys();
        foreign.audience = "another-service".into();
        assert!(foreign.verify(&access, TokenKind::Access).is_err());
    }

    #[tokio::test]
    async fn default_admin_is_seeded_once() {
        let state = AppState::fake();
        ensure_default_admin(&state.storage, &state.config.admin).await.unwrap();
        ensure_default_admin(&state.storage, &state.config.admin).await.unwrap();
        let users = state.storage.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].is_admin());
        assert!(verify_password("admin123", &users[0].password_hash).unwrap());
    }

    #[tokio::test]
    async fn current_user_resolves_bearer_tokens() {
        let state = AppState::fake();
        ensure_default_admin(&state.storage, &state.config.admin).await.unwrap();
        let admin = state.storage.find_user_by_username("admin").await.unwrap().unwrap();
        let keys = JwtKeys::from_ref(&state);

        let access = keys.sign(&admin.id, TokenKind::Access).unwrap();
        let user = extract(&state, Some(format!("Bearer {access}"))).await.unwrap();
        assert_eq!(user.id, admin.id);

        let missing = extract(&state, None).await.unwrap_err();
        assert_eq!(missing.0, StatusCode::UNAUTHORIZED);

        let refresh = keys.sign(&admin.id, TokenKind::Refresh).unwrap();
        let wrong_kind = extract(&state, Some(format!("Bearer {refresh}"))).await.unwrap_err();
        assert_eq!(wrong_kind.0, StatusCode::UNAUTHORIZED);

        let unknown = keys.sign("U0", TokenKind::Access).unwrap();
        let gone = extract(&state, Some(format!("Bearer {unknown}"))).await.unwrap_err();
        assert_eq!(gone.0, StatusCode::UNAUTHORIZED);
    }
}
