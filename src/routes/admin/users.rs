use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
    pg::Pg,
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use super::{AccountReq, AdminScope};
use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        auth::Role,
        middleware::CurrentUser,
    },
    domain::{
        ValidationError,
        pagination::{PageQuery, Paged},
        validation,
    },
    models::{UpdateUserEntity, UserEntity},
    routes::auth::{insert_user, role_of},
    schema::{hospitals, shops, users},
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_users, create_user))
        .routes(utoipa_axum::routes!(get_user, update_user, delete_user))
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Name or email fragment; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn filtered(
    role: Option<Role>,
    is_active: Option<bool>,
    search: Option<&str>,
) -> users::BoxedQuery<'static, Pg> {
    let mut query = users::table.into_boxed();
    if let Some(role) = role {
        query = query.filter(users::role.eq(role.as_str()));
    }
    if let Some(is_active) = is_active {
        query = query.filter(users::is_active.eq(is_active));
    }
    if let Some(search) = search {
        let pattern = validation::like_pattern(search);
        query = query.filter(
            users::email
                .ilike(pattern.clone())
                .or(users::first_name.ilike(pattern.clone()))
                .or(users::last_name.ilike(pattern)),
        );
    }
    query
}

/// All accounts, newest first.
#[utoipa::path(
    get,
    path = "/users",
    tags = ["Admin users"],
    security(("bearerAuth" = [])),
    params(UserListQuery),
    responses(
        (status = 200, description = "A page of users", body = StdResponse<Paged<UserEntity>, String>)
    )
)]
async fn get_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = filtered(query.role, query.is_active, search.as_deref())
        .count()
        .get_result(conn)
        .await
        .context("Failed to count users")?;

    let items: Vec<UserEntity> = filtered(query.role, query.is_active, search.as_deref())
        .order((users::created_at.desc(), users::id.desc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(UserEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get users")?;

    Ok(StdResponse {
        data: Some(Paged {
            items,
            pagination: page.paginate(total),
        }),
        message: Some("Users retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateUserReq {
    #[serde(flatten)]
    pub account: AccountReq,
    pub role: Option<Role>,
    /// Required for hospital admins.
    pub hospital_id: Option<i32>,
    /// Required for shop admins.
    pub shop_id: Option<i32>,
}

impl CreateUserReq {
    fn role_and_scope(&self) -> Result<(Role, AdminScope), ValidationError> {
        let role = self
            .role
            .ok_or_else(|| ValidationError::new("Role is required"))?;
        if role == Role::SuperAdmin {
            return Err(ValidationError::new("Super admin accounts cannot be created"));
        }
        Ok((role, AdminScope::for_role(role, self.hospital_id, self.shop_id)?))
    }
}

/// Create an account. A hospital or shop admin is linked to a hospital or
/// shop that has no admin yet.
#[utoipa::path(
    post,
    path = "/users",
    tags = ["Admin users"],
    security(("bearerAuth" = [])),
    request_body = CreateUserReq,
    responses(
        (status = 201, description = "User created", body = StdResponse<UserEntity, String>),
        (status = 400, description = "Invalid user, or the hospital/shop already has an admin"),
        (status = 409, description = "Email already registered")
    )
)]
async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserReq>,
) -> Result<impl IntoResponse, AppError> {
    let (role, scope) = body.role_and_scope()?;
    let new_user = body.account.into_user(role, scope)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user = conn
        .transaction(move |conn| {
            Box::pin(async move {
                match scope {
                    AdminScope::Hospital(id) => super::ensure_hospital_unassigned(conn, id).await?,
                    AdminScope::Shop(id) => super::ensure_shop_unassigned(conn, id).await?,
                    AdminScope::None => {}
                }

                let user = insert_user(conn, new_user).await?;

                match scope {
                    AdminScope::Hospital(id) => {
                        diesel::update(hospitals::table.find(id))
                            .set(hospitals::admin_id.eq(user.id))
                            .execute(conn)
                            .await
                            .context("Failed to assign hospital admin")?;
                    }
                    AdminScope::Shop(id) => {
                        diesel::update(shops::table.find(id))
                            .set(shops::admin_id.eq(user.id))
                            .execute(conn)
                            .await
                            .context("Failed to assign shop admin")?;
                    }
                    AdminScope::None => {}
                }

                Ok::<UserEntity, AppError>(user)
            })
        })
        .await?;

    info!("Created {} #{}", user.role, user.id);
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(user),
            message: Some("User created successfully"),
        },
    ))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tags = ["Admin users"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = StdResponse<UserEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user: UserEntity = users::table
        .find(id)
        .select(UserEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(user),
        message: Some("User retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateUserReq {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// An empty string clears the phone number.
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Checks `body` against the stored user and the acting admin.
fn build_changes(
    user: &UserEntity,
    current_role: Role,
    acting_user_id: i32,
    body: UpdateUserReq,
) -> Result<UpdateUserEntity, ValidationError> {
    if user.id == acting_user_id {
        let demoted = body.role.is_some_and(|role| role != current_role);
        if demoted || body.is_active == Some(false) {
            return Err(ValidationError::new(
                "You cannot deactivate or change the role of your own account",
            ));
        }
    }
    if let Some(role) = body.role {
        AdminScope::for_role(role, user.hospital_id, user.shop_id)?;
    }

    Ok(UpdateUserEntity {
        first_name: body
            .first_name
            .map(|name| validation::required("First name", Some(&name)))
            .transpose()?,
        last_name: body
            .last_name
            .map(|name| validation::required("Last name", Some(&name)))
            .transpose()?,
        phone: match body.phone.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(phone) => Some(Some(validation::phone(phone)?)),
        },
        role: body.role.map(|role| role.as_str().to_string()),
        is_active: body.is_active,
    })
}

/// Update names, phone, role or activation.
#[utoipa::path(
    put,
    path = "/users/{id}",
    tags = ["Admin users"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    request_body = UpdateUserReq,
    responses(
        (status = 200, description = "User updated", body = StdResponse<UserEntity, String>),
        (status = 400, description = "Invalid change"),
        (status = 404, description = "Not found")
    )
)]
async fn update_user(
    State(state): State<AppState>,
    Extension(acting): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateUserReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let user: UserEntity = users::table
                    .find(id)
                    .select(UserEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;
                let current_role = role_of(&user)?;
                let changes = build_changes(&user, current_role, acting.id, body)?;

                // A demoted admin no longer manages their hospital or shop.
                let next_role = changes
                    .role
                    .as_deref()
                    .map(str::parse::<Role>)
                    .transpose()?
                    .unwrap_or(current_role);
                if current_role == Role::HospitalAdmin && next_role != Role::HospitalAdmin {
                    diesel::update(hospitals::table.filter(hospitals::admin_id.eq(user.id)))
                        .set(hospitals::admin_id.eq(None::<i32>))
                        .execute(conn)
                        .await
                        .context("Failed to release hospital")?;
                }
                if current_role == Role::ShopAdmin && next_role != Role::ShopAdmin {
                    diesel::update(shops::table.filter(shops::admin_id.eq(user.id)))
                        .set(shops::admin_id.eq(None::<i32>))
                        .execute(conn)
                        .await
                        .context("Failed to release shop")?;
                }

                let user: UserEntity = diesel::update(users::table.find(id))
                    .set((&changes, users::updated_at.eq(diesel::dsl::now)))
                    .returning(UserEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update user")?;

                Ok::<UserEntity, AppError>(user)
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(user),
        message: Some("User updated successfully"),
    })
}

/// Delete an account. Super admins cannot be deleted.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tags = ["Admin users"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = StdResponse<UserEntity, String>),
        (status = 400, description = "Cannot delete super admin user"),
        (status = 404, description = "Not found")
    )
)]
async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let user = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let user: UserEntity = users::table
                    .find(id)
                    .select(UserEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;
                if role_of(&user)? == Role::SuperAdmin {
                    return Err(AppError::BadRequest("Cannot delete super admin user".into()));
                }

                // hospitals.admin_id and shops.admin_id are cleared by ON DELETE SET NULL.
                diesel::delete(users::table.find(id))
                    .execute(conn)
                    .await
                    .context("Failed to delete user")?;

                Ok::<UserEntity, AppError>(user)
            })
        })
        .await?;

    info!("Deleted user #{}", user.id);
    Ok(StdResponse {
        data: Some(user),
        message: Some("User deleted successfully"),
    })
}
