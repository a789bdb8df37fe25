use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::storage::types::{GuestPermission, User, UserKind};

/// Token type used to distinguish Access and Refresh JWTs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[serde(alias = "Access")]
    Access,
    #[serde(alias = "Refresh")]
    Refresh,
}

/// Standard JWT claims used in the app.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,     // user or guest id
    pub exp: usize,      // expiration time
    pub iat: usize,      // issued at
    pub iss: String,     // issuer
    pub aud: String,     // audience
    pub kind: TokenKind, // access or refresh
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `username` may also hold an email address.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGuestRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub permission: GuestPermission,
}

/// Response returned after signup, login or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Account view returned to clients.
#[derive(Debug, Serialize, PartialEq)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: &'static str,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<GuestPermission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_unlimited: Option<bool>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        let (owner_id, permission, item_limit, has_unlimited) = match &user.kind {
            UserKind::Owner {
                item_limit,
                has_unlimited,
                ..
            } => (None, None, Some(*item_limit), Some(*has_unlimited)),
            UserKind::Guest {
                owner_id,
                permission,
            } => (Some(owner_id.clone()), Some(*permission), None, None),
        };
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role_name(),
            is_active: user.is_active,
            created_at: user.created_at.clone(),
            last_login: user.last_login.clone(),
            owner_id,
            permission,
            item_limit,
            has_unlimited,
        }
    }
}
