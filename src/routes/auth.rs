use anyhow::Context;
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper, result::DatabaseErrorKind,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        aliases::DieselError,
        app_error::{AppError, StdResponse},
        app_state::AppState,
        auth::{self, Role},
        middleware::{self, CurrentUser},
    },
    domain::validation,
    models::{CreateUserEntity, UserEntity},
    schema::users,
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/auth",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(register))
            .routes(utoipa_axum::routes!(login))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(me))
                    .routes(utoipa_axum::routes!(change_password))
                    .routes(utoipa_axum::routes!(refresh))
                    .route_layer(axum::middleware::from_fn_with_state(
                        state,
                        middleware::users_authorization,
                    )),
            ),
    )
}

/// Inserts a user, turning a duplicate email into a readable 409.
pub(crate) async fn insert_user(
    conn: &mut AsyncPgConnection,
    new_user: CreateUserEntity,
) -> Result<UserEntity, AppError> {
    diesel::insert_into(users::table)
        .values(new_user)
        .returning(UserEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::Conflict("User already exists with this email".into())
            }
            err => err.into(),
        })
}

/// Parses the role column, which only ever holds values written by [`Role::as_str`].
pub(crate) fn role_of(user: &UserEntity) -> Result<Role, AppError> {
    user.role
        .parse()
        .map_err(|_| AppError::Other(anyhow::anyhow!("User {} has unknown role {}", user.id, user.role)))
}

#[derive(Serialize, ToSchema)]
pub struct AuthRes {
    pub user: UserEntity,
    pub token: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct RegisterReq {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
}

/// Create a patient account.
#[utoipa::path(
    post,
    path = "/register",
    tags = ["Auth"],
    request_body = RegisterReq,
    responses(
        (status = 201, description = "Account created", body = StdResponse<AuthRes, String>),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered")
    )
)]
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    let first_name = validation::required("First name", body.first_name.as_deref())?;
    let last_name = validation::required("Last name", body.last_name.as_deref())?;
    let email = validation::email(&validation::required("Email", body.email.as_deref())?)?;
    let password = body.password.unwrap_or_default();
    validation::password(&password)?;
    let phone = match body.phone.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(phone) => Some(validation::phone(phone)?),
    };

    let password_hash = auth::hash_password(&password)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user = insert_user(
        conn,
        CreateUserEntity {
            email,
            password_hash,
            role: Role::User.as_str().into(),
            first_name,
            last_name,
            phone,
            hospital_id: None,
            shop_id: None,
        },
    )
    .await?;
    let token = auth::issue_token(&state.config.auth, user.id, Role::User)?;

    info!("Registered user #{}", user.id);
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(AuthRes { user, token }),
            message: Some("Account created successfully"),
        },
    ))
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct LoginReq {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Exchange credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/login",
    tags = ["Auth"],
    request_body = LoginReq,
    responses(
        (status = 200, description = "Logged in", body = StdResponse<AuthRes, String>),
        (status = 401, description = "Invalid credentials or deactivated account")
    )
)]
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginReq>,
) -> Result<impl IntoResponse, AppError> {
    let email = validation::required("Email", body.email.as_deref())?.to_lowercase();
    let password = validation::required("Password", body.password.as_deref())?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .filter(users::email.eq(&email))
        .select(UserEntity::as_select())
        .first(conn)
        .await
        .optional()
        .context("Failed to load user")?
        .filter(|user| auth::verify_password(&password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".into()))?;

    if !user.is_active {
        return Err(AppError::Unauthorized("Account is deactivated".into()));
    }

    let user: UserEntity = diesel::update(users::table.find(user.id))
        .set(users::last_login.eq(Utc::now()))
        .returning(UserEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to record login")?;

    let token = auth::issue_token(&state.config.auth, user.id, role_of(&user)?)?;

    Ok(StdResponse {
        data: Some(AuthRes { user, token }),
        message: Some("Logged in successfully"),
    })
}

/// The signed-in user's account.
#[utoipa::path(
    get,
    path = "/me",
    tags = ["Auth"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current user", body = StdResponse<UserEntity, String>)
    )
)]
async fn me(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .find(current.id)
        .select(UserEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(user),
        message: Some("Get current user successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ChangePasswordReq {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Change the signed-in user's password.
#[utoipa::path(
    put,
    path = "/change-password",
    tags = ["Auth"],
    security(("bearerAuth" = [])),
    request_body = ChangePasswordReq,
    responses(
        (status = 200, description = "Password changed", body = StdResponse<UserEntity, String>),
        (status = 400, description = "Current password is incorrect")
    )
)]
async fn change_password(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<ChangePasswordReq>,
) -> Result<impl IntoResponse, AppError> {
    let current_password =
        validation::required("Current password", body.current_password.as_deref())?;
    let new_password = body.new_password.unwrap_or_default();
    validation::password(&new_password)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let stored_hash: String = users::table
        .find(current.id)
        .select(users::password_hash)
        .first(conn)
        .await?;
    if !auth::verify_password(&current_password, &stored_hash) {
        return Err(AppError::BadRequest("Current password is incorrect".into()));
    }

    let user: UserEntity = diesel::update(users::table.find(current.id))
        .set(users::password_hash.eq(auth::hash_password(&new_password)?))
        .returning(UserEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to update password")?;

    info!("User #{} changed their password", current.id);
    Ok(StdResponse {
        data: Some(user),
        message: Some("Password changed successfully"),
    })
}

#[derive(Serialize, ToSchema)]
pub struct RefreshRes {
    pub token: String,
}

/// Issue a fresh token for the signed-in user.
#[utoipa::path(
    post,
    path = "/refresh",
    tags = ["Auth"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "New token", body = StdResponse<RefreshRes, String>)
    )
)]
async fn refresh(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AppError> {
    let token = auth::issue_token(&state.config.auth, current.id, current.role)?;
    Ok(StdResponse {
        data: Some(RefreshRes { token }),
        message: Some("Token refreshed successfully"),
    })
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::core::test_support::{body_json, empty_request, json_request, test_state};

    fn app() -> Router {
        let state = test_state();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();
        router.with_state(state)
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_email() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/auth/register",
                None,
                json!({
                    "first_name": "Asha",
                    "last_name": "Menon",
                    "email": "not-an-email",
                    "password": "secret1"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Please enter a valid email");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/auth/register",
                None,
                json!({
                    "first_name": "Asha",
                    "last_name": "Menon",
                    "email": "asha@example.com",
                    "password": "123"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Password must be at least 6 characters");
    }

    #[tokio::test]
    async fn test_login_requires_password() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/auth/login",
                None,
                json!({ "email": "asha@example.com" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Password is required");
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let response = app()
            .oneshot(empty_request("GET", "/auth/me", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Not authorized, no token");
    }
}
