use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, CreateGuestRequest, LoginRequest, PublicUser, RefreshRequest,
            SignupRequest,
        },
        services::{
            hash_password, is_valid_email, require_owner, verify_password, CurrentUser, JwtKeys,
            TokenKind,
        },
    },
    state::AppState,
    storage::types::{NewUser, Role, User, UserKind, UserPatch, ITEM_LIMIT_DEFAULT},
    storage::ids::iso_timestamp,
};

type ApiError = (StatusCode, String);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(get_me))
}

pub fn guest_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/create-guest", post(create_guest))
        .route("/auth/guests", get(list_guests))
        .route("/auth/guest/:id", delete(delete_guest))
}

fn issue_tokens(state: &AppState, user: &User) -> Result<AuthResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let sign = |kind: TokenKind| {
        keys.sign(&user.id, kind).map_err(|e| {
            error!(error = %e, ?kind, "jwt sign failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
    };
    let access_token = sign(TokenKind::Access)?;
    let refresh_token = sign(TokenKind::Refresh)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

fn check_credentials_shape(username: &str, email: &str, password: &str) -> Result<(), ApiError> {
    if username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username is required".into()));
    }
    if !is_valid_email(email) {
        warn!(email = %email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    if password.len() < 8 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }
    Ok(())
}

fn hashed(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();
    check_credentials_shape(&payload.username, &payload.email, &payload.password)?;

    let user = state
        .storage
        .create_user(NewUser {
            username: payload.username,
            email: payload.email,
            password_hash: hashed(&payload.password)?,
            is_active: true,
            kind: UserKind::Owner {
                role: Role::User,
                item_limit: ITEM_LIMIT_DEFAULT,
                has_unlimited: false,
            },
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(issue_tokens(&state, &user)?)))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let login = payload.username.trim();
    let found = if login.contains('@') {
        state.storage.find_user_by_email(&login.to_lowercase()).await?
    } else {
        state.storage.find_user_by_username(login).await?
    };
    let Some(user) = found else {
        warn!("login unknown user");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    };

    let ok = verify_password(&payload.password, &user.password_hash).map_err(|e| {
        error!(error = %e, user_id = %user.id, "verify_password failed");
        (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
    })?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login to disabled account");
        return Err((StatusCode::FORBIDDEN, "Account is disabled".into()));
    }

    let now = iso_timestamp(time::OffsetDateTime::now_utc());
    let user = state
        .storage
        .update_user(
            &user.id,
            UserPatch {
                last_login: Some(now),
                ..Default::default()
            },
        )
        .await?;

    info!(user_id = %user.id, role = user.role_name(), "user logged in");
    Ok(Json(issue_tokens(&state, &user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify(&payload.refresh_token, TokenKind::Refresh)
        .map_err(|e| (StatusCode::UNAUTHORIZED, format!("{}", e)))?;

    let user = state
        .storage
        .find_user_by_id(&claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or((StatusCode::UNAUTHORIZED, "User not found".to_string()))?;
    Ok(Json(issue_tokens(&state, &user)?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

#[instrument(skip(state, payload), fields(owner_id = %owner.id, username = %payload.username))]
pub async fn create_guest(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Json(mut payload): Json<CreateGuestRequest>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    require_owner(&owner)?;
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();
    check_credentials_shape(&payload.username, &payload.email, &payload.password)?;

    let guest = state
        .storage
        .create_user(NewUser {
            username: payload.username,
            email: payload.email,
            password_hash: hashed(&payload.password)?,
            is_active: true,
            kind: UserKind::Guest {
                owner_id: owner.id.clone(),
                permission: payload.permission,
            },
        })
        .await?;

    info!(guest_id = %guest.id, permission = payload.permission.as_str(), "guest created");
    Ok((StatusCode::CREATED, Json(PublicUser::from(&guest))))
}

#[instrument(skip_all, fields(owner_id = %owner.id))]
pub async fn list_guests(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    require_owner(&owner)?;
    let guests = state.storage.list_guests_by_owner(&owner.id).await?;
    Ok(Json(guests.iter().map(PublicUser::from).collect()))
}

#[instrument(skip(state, caller), fields(caller_id = %caller.id))]
pub async fn delete_guest(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(guest_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let guest = state
        .storage
        .find_user_by_id(&guest_id)
        .await?
        .filter(User::is_guest)
        .ok_or((StatusCode::NOT_FOUND, "Guest not found".to_string()))?;

    if guest.owner_id() != Some(caller.id.as_str()) && !caller.is_admin() {
        warn!(%guest_id, "guest delete by non-owner");
        return Err((StatusCode::FORBIDDEN, "Not your guest".into()));
    }

    state.storage.delete_user(&guest.id).await?;
    info!(%guest_id, "guest deleted");
    Ok(StatusCode::NO_CONTENT)
}
