use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::api::error::{ApiError, ValidationErrorBuilder};
use crate::api::validation::{validate_display_name, validate_email, validate_password};
use crate::db::{
    AccessTokenResponse, AuthResponse, DbPool, LoginRequest, RefreshToken, RefreshTokenRequest,
    RegisterRequest, User, UserResponse,
};
use crate::AppState;

/// The caller, as established by `auth_middleware`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 keys derived once from the configured secret
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: &str, email: &str, ttl_minutes: i64) -> Result<String, ApiError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + ttl_minutes * 60,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            tracing::error!("Failed to sign access token: {}", e);
            ApiError::internal("Failed to issue token")
        })
    }

    pub fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .ok()
            .map(|data| data.claims)
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// 32 random bytes, hex encoded
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

async fn issue_tokens(state: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let auth = &state.config.auth;
    let access_token = state
        .jwt
        .issue(&user.id, &user.email, auth.access_token_minutes)?;

    let refresh_token = generate_token();
    let now = chrono::Utc::now();
    let expires_at = now + chrono::Duration::days(auth.refresh_token_days);

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(hash_token(&refresh_token))
    .bind(expires_at.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.db)
    .await?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: auth.access_token_minutes * 60,
        user: UserResponse::from(user),
    })
}

/// Register a new account and sign it in
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim().to_lowercase();

    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&email));
    errors.check("password", validate_password(&request.password));
    errors.check("displayName", validate_display_name(&request.display_name));
    errors.finish()?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("Email already registered"));
    }

    let password_hash = hash_password(&request.password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to create account")
    })?;

    let now = chrono::Utc::now().to_rfc3339();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        password_hash,
        display_name: request.display_name.map(|n| n.trim().to_string()),
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.display_name)
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "Registered user");

    let response = issue_tokens(&state, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(request) = payload?;
    let email = request.email.trim().to_lowercase();

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    Ok(Json(issue_tokens(&state, user).await?))
}

/// Exchange a refresh token for a fresh access token
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<Json<AccessTokenResponse>, ApiError> {
    let Json(request) = payload?;

    let stored: Option<RefreshToken> =
        sqlx::query_as("SELECT * FROM refresh_tokens WHERE token_hash = ?")
            .bind(hash_token(&request.refresh_token))
            .fetch_optional(&state.db)
            .await?;
    let stored = stored.ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let expired = chrono::DateTime::parse_from_rfc3339(&stored.expires_at)
        .map(|at| at < chrono::Utc::now())
        .unwrap_or(true);
    if expired {
        sqlx::query("DELETE FROM refresh_tokens WHERE id = ?")
            .bind(&stored.id)
            .execute(&state.db)
            .await?;
        return Err(ApiError::unauthorized("Refresh token expired"));
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&stored.user_id)
        .fetch_optional(&state.db)
        .await?;
    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let minutes = state.config.auth.access_token_minutes;
    Ok(Json(AccessTokenResponse {
        access_token: state.jwt.issue(&user.id, &user.email, minutes)?,
        token_type: "Bearer".to_string(),
        expires_in: minutes * 60,
    }))
}

/// Revoke every refresh token of the caller
pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Logged out successfully" })))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?;
    let record = record.ok_or_else(|| ApiError::unauthorized("Invalid token"))?;

    Ok(Json(serde_json::json!({ "user": UserResponse::from(record) })))
}

/// Create the development account used when authentication is disabled.
pub async fn ensure_dev_user(pool: &DbPool, email: &str) -> anyhow::Result<AuthUser> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    let id = match existing {
        Some((id,)) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            let now = chrono::Utc::now().to_rfc3339();
            // "!" never parses as a PHC string, so password login is impossible
            sqlx::query(
                "INSERT INTO users (id, email, password_hash, display_name, created_at, updated_at) VALUES (?, ?, '!', 'Developer', ?, ?)",
            )
            .bind(&id)
            .bind(email)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await?;
            tracing::info!("Created development user {}", email);
            id
        }
    };

    Ok(AuthUser {
        id,
        email: email.to_string(),
    })
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Require a valid access token and attach the caller to the request
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(dev_user) = &state.dev_user {
        request.extensions_mut().insert(dev_user.clone());
        return next.run(request).await;
    }

    let Some(token) = bearer_token(&request) else {
        return ApiError::unauthorized("No token provided").into_response();
    };

    match state.jwt.verify(token) {
        Some(claims) => {
            request.extensions_mut().insert(AuthUser {
                id: claims.sub,
                email: claims.email,
            });
            next.run(request).await
        }
        None => ApiError::unauthorized("Invalid token").into_response(),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("No token provided"))
    }
}
