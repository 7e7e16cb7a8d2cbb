//! Authentication handlers: login, refresh, me

use tracing::{error, info, warn};

use super::HandlerContext;
use crate::auth;
use crate::types::{
    AuthResponse, EmptyPayload, ErrorResponse, LoginRequest, Request, User, UserPublic,
};

const TOKEN_TYPE: &str = "bearer";

/// Handle `collab.auth.login`
pub async fn login(
    ctx: &HandlerContext,
    request: Request<LoginRequest>,
) -> Result<AuthResponse, ErrorResponse> {
    let email = request.payload.email.trim().to_lowercase();
    if email.is_empty() || request.payload.password.is_empty() {
        return Err(ErrorResponse::new(
            request.id,
            "INVALID_REQUEST",
            "Email and password are required",
        ));
    }

    if !ctx.login_limiter.check_and_record(&email) {
        warn!("Rate limited login attempt for: {}", email);
        return Err(ErrorResponse::new(
            request.id,
            "RATE_LIMITED",
            "Too many login attempts. Please try again later.",
        ));
    }

    let user = match ctx.users.find_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(invalid_credentials(&request)),
        Err(e) => {
            error!("Database error during login: {}", e);
            return Err(ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string()));
        }
    };

    match auth::verify_password(&request.payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(invalid_credentials(&request)),
        Err(e) => {
            warn!("Unusable password hash for {}: {}", user.id, e);
            return Err(invalid_credentials(&request));
        }
    }

    info!("User logged in: {}", user.id);
    issue(ctx, &request, user, true)
}

/// Handle `collab.auth.refresh`: trade a valid token for a fresh one
pub async fn refresh(
    ctx: &HandlerContext,
    request: Request<EmptyPayload>,
) -> Result<AuthResponse, ErrorResponse> {
    let user = current_user(ctx, &request).await?;
    issue(ctx, &request, user, false)
}

/// Handle `collab.auth.me`
pub async fn me(
    ctx: &HandlerContext,
    request: Request<EmptyPayload>,
) -> Result<UserPublic, ErrorResponse> {
    current_user(ctx, &request).await.map(UserPublic::from)
}

async fn current_user<T>(ctx: &HandlerContext, request: &Request<T>) -> Result<User, ErrorResponse> {
    let auth_info = ctx.authorize(request)?;
    match ctx.users.find(auth_info.user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ErrorResponse::new(request.id, "UNAUTHORIZED", "Unauthenticated.")),
        Err(e) => {
            error!("Failed to load user {}: {}", auth_info.user_id, e);
            Err(ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string()))
        }
    }
}

fn issue<T>(
    ctx: &HandlerContext,
    request: &Request<T>,
    user: User,
    include_user: bool,
) -> Result<AuthResponse, ErrorResponse> {
    let expires_in = ctx.jwt_ttl.as_secs();
    let token = auth::generate_token(user.id, &user.email, &ctx.jwt_secret, expires_in)
        .map_err(|e| {
            error!("Failed to generate token: {}", e);
            ErrorResponse::new(request.id, "INTERNAL_ERROR", "Failed to generate token")
        })?;

    Ok(AuthResponse {
        token,
        token_type: TOKEN_TYPE,
        expires_in,
        user: include_user.then(|| UserPublic::from(user)),
    })
}

fn invalid_credentials<T>(request: &Request<T>) -> ErrorResponse {
    ErrorResponse::new(request.id, "INVALID_CREDENTIALS", "Invalid credentials")
}
