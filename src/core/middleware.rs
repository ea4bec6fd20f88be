//! Bearer-token authorization layers. Each one resolves the caller and
//! injects a [`CurrentUser`] (plus a scope for admins tied to one hospital or
//! shop) into the request extensions.

use anyhow::{Context, anyhow};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use diesel::{OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;

use crate::{
    core::{
        app_error::AppError,
        app_state::AppState,
        auth::{self, Role},
    },
    models::UserEntity,
    schema::{hospitals, shops, users},
};

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub hospital_id: Option<i32>,
    pub shop_id: Option<i32>,
}

/// The hospital a hospital admin manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HospitalScope(pub i32);

/// The shop a shop admin manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopScope(pub i32);

fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".into()))
}

fn ensure_role(role: Role, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.is_empty() || allowed.contains(&role) {
        return Ok(());
    }
    Err(AppError::ForbiddenResource(format!(
        "Role {} is not authorized to access this route",
        role.as_str()
    )))
}

/// Validates the token, then reloads the user so deactivation and role
/// changes take effect before the token expires. An empty `allowed` list
/// admits every role.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    allowed: &[Role],
) -> Result<CurrentUser, AppError> {
    let token = bearer_token(headers)?;
    let claims = auth::verify_token(&state.config.auth, &token)?;
    ensure_role(claims.role, allowed)?;
    let user_id = claims.user_id()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .find(user_id)
        .select(UserEntity::as_select())
        .first(conn)
        .await
        .optional()
        .context("Failed to load user")?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

    if !user.is_active {
        return Err(AppError::Unauthorized("User account is deactivated".into()));
    }

    let role: Role = user
        .role
        .parse()
        .map_err(|_| anyhow!("User {} has unknown role {}", user.id, user.role))?;
    ensure_role(role, allowed)?;

    Ok(CurrentUser {
        id: user.id,
        email: user.email,
        role,
        hospital_id: user.hospital_id,
        shop_id: user.shop_id,
    })
}

/// Any signed-in user.
pub async fn users_authorization(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers(), &[]).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub async fn super_admins_authorization(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers(), &[Role::SuperAdmin]).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Hospital admins whose hospital exists and is active.
pub async fn hospital_admins_authorization(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers(), &[Role::HospitalAdmin]).await?;
    let hospital_id = user.hospital_id.ok_or_else(|| {
        AppError::ForbiddenResource("Hospital admin must be associated with a hospital".into())
    })?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let is_active: Option<bool> = hospitals::table
        .find(hospital_id)
        .select(hospitals::is_active)
        .first(conn)
        .await
        .optional()
        .context("Failed to load hospital")?;

    if is_active != Some(true) {
        return Err(AppError::ForbiddenResource(
            "Associated hospital not found or inactive".into(),
        ));
    }

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(HospitalScope(hospital_id));
    Ok(next.run(req).await)
}

/// Shop admins whose shop exists and is active.
pub async fn shop_admins_authorization(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    shop_admins(state, req, next, true).await
}

/// Shop admins whose shop exists, active or not. Only the status toggle
/// sits behind this layer so a deactivated shop can be switched back on.
pub async fn shop_admins_any_status_authorization(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    shop_admins(state, req, next, false).await
}

fn shop_access(is_active: Option<bool>, require_active: bool) -> Result<(), AppError> {
    match is_active {
        Some(true) => Ok(()),
        Some(false) if !require_active => Ok(()),
        _ => Err(AppError::ForbiddenResource(
            "Associated shop not found or inactive".into(),
        )),
    }
}

async fn shop_admins(
    state: AppState,
    mut req: Request,
    next: Next,
    require_active: bool,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers(), &[Role::ShopAdmin]).await?;
    let shop_id = user.shop_id.ok_or_else(|| {
        AppError::ForbiddenResource("Shop admin must be associated with a shop".into())
    })?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let is_active: Option<bool> = shops::table
        .find(shop_id)
        .select(shops::is_active)
        .first(conn)
        .await
        .optional()
        .context("Failed to load shop")?;
    shop_access(is_active, require_active)?;

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(ShopScope(shop_id));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::core::test_support::test_state;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                hospital_admins_authorization,
            ))
            .with_state(state)
    }

    fn request(token: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/protected");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let response = app(test_state()).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_is_unauthorized() {
        let response = app(test_state()).oneshot(request(Some("garbage"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_role_is_forbidden() {
        let state = test_state();
        let token = auth::issue_token(&state.config.auth, 7, Role::User).unwrap();
        let response = app(state).oneshot(request(Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let req = request(Some("abc.def"));
        assert_eq!(bearer_token(req.headers()).unwrap(), "abc.def");

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic xyz")
            .body(Body::empty())
            .unwrap();
        assert!(bearer_token(req.headers()).is_err());
    }

    #[test]
    fn test_ensure_role() {
        assert!(ensure_role(Role::User, &[]).is_ok());
        assert!(ensure_role(Role::ShopAdmin, &[Role::ShopAdmin]).is_ok());
        assert!(matches!(
            ensure_role(Role::ShopAdmin, &[Role::SuperAdmin]),
            Err(AppError::ForbiddenResource(m)) if m == "Role shop_admin is not authorized to access this route"
        ));
    }

    #[test]
    fn test_inactive_shops_only_reach_the_status_toggle() {
        assert!(shop_access(Some(true), true).is_ok());
        assert!(shop_access(Some(false), false).is_ok());
        assert!(matches!(
            shop_access(Some(false), true),
            Err(AppError::ForbiddenResource(m)) if m == "Associated shop not found or inactive"
        ));
        assert!(shop_access(None, false).is_err());
    }
}
