//! Platform administration, restricted to super admins.

pub mod hospitals;
pub mod shops;
pub mod stats;
pub mod users;

use anyhow::Context;
use diesel::{OptionalExtension, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{app_error::AppError, app_state::AppState, auth::{self, Role}, middleware},
    domain::{ValidationError, validation},
    models::CreateUserEntity,
    schema,
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/admin",
        OpenApiRouter::new()
            .merge(users::routes())
            .merge(hospitals::routes())
            .merge(shops::routes())
            .merge(stats::routes())
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                middleware::super_admins_authorization,
            )),
    )
}

/// Login details for a new account created by a super admin.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct AccountReq {
    pub email: Option<String>,
    /// At least 6 characters.
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

impl AccountReq {
    fn validate(self) -> Result<ValidAccount, ValidationError> {
        let email = validation::email(&validation::required("Email", self.email.as_deref())?)?;
        let password = self.password.unwrap_or_default();
        validation::password(&password)?;
        Ok(ValidAccount {
            email,
            password,
            first_name: validation::required("First name", self.first_name.as_deref())?,
            last_name: validation::required("Last name", self.last_name.as_deref())?,
            phone: match self.phone.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(phone) => Some(validation::phone(phone)?),
            },
        })
    }

    /// Validates the details and hashes the password.
    pub(crate) fn into_user(
        self,
        role: Role,
        scope: AdminScope,
    ) -> Result<CreateUserEntity, AppError> {
        let account = self.validate()?;
        let (hospital_id, shop_id) = match scope {
            AdminScope::Hospital(id) => (Some(id), None),
            AdminScope::Shop(id) => (None, Some(id)),
            AdminScope::None => (None, None),
        };

        Ok(CreateUserEntity {
            email: account.email,
            password_hash: auth::hash_password(&account.password)?,
            role: role.as_str().into(),
            first_name: account.first_name,
            last_name: account.last_name,
            phone: account.phone,
            hospital_id,
            shop_id,
        })
    }
}

#[derive(Debug)]
struct ValidAccount {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
}

/// What an admin account manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScope {
    Hospital(i32),
    Shop(i32),
    None,
}

impl AdminScope {
    /// Hospital admins need a hospital and shop admins a shop; other roles
    /// are never scoped.
    pub fn for_role(
        role: Role,
        hospital_id: Option<i32>,
        shop_id: Option<i32>,
    ) -> Result<Self, ValidationError> {
        match role {
            Role::HospitalAdmin => hospital_id
                .map(AdminScope::Hospital)
                .ok_or_else(|| ValidationError::new("Hospital ID is required for hospital admin")),
            Role::ShopAdmin => shop_id
                .map(AdminScope::Shop)
                .ok_or_else(|| ValidationError::new("Shop ID is required for shop admin")),
            Role::SuperAdmin | Role::User => Ok(AdminScope::None),
        }
    }
}

/// Locks the hospital and checks nobody manages it yet.
pub(crate) async fn ensure_hospital_unassigned(
    conn: &mut AsyncPgConnection,
    hospital_id: i32,
) -> Result<(), AppError> {
    let admin_id: Option<i32> = schema::hospitals::table
        .find(hospital_id)
        .select(schema::hospitals::admin_id)
        .for_update()
        .first(conn)
        .await
        .optional()
        .context("Failed to load hospital")?
        .ok_or_else(|| AppError::BadRequest("Hospital not found".into()))?;

    if admin_id.is_some() {
        return Err(AppError::BadRequest(
            "Hospital already has an assigned admin".into(),
        ));
    }
    Ok(())
}

/// Locks the shop and checks nobody manages it yet.
pub(crate) async fn ensure_shop_unassigned(
    conn: &mut AsyncPgConnection,
    shop_id: i32,
) -> Result<(), AppError> {
    let admin_id: Option<i32> = schema::shops::table
        .find(shop_id)
        .select(schema::shops::admin_id)
        .for_update()
        .first(conn)
        .await
        .optional()
        .context("Failed to load shop")?
        .ok_or_else(|| AppError::BadRequest("Shop not found".into()))?;

    if admin_id.is_some() {
        return Err(AppError::BadRequest("Shop already has an assigned admin".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::core::test_support::{body_json, empty_request, test_state};

    fn app() -> (Router, AppState) {
        let state = test_state();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();
        (router.with_state(state.clone()), state)
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (app, _) = app();
        let response = app
            .oneshot(empty_request("GET", "/admin/stats", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejects_hospital_admins() {
        let (app, state) = app();
        let token = auth::issue_token(&state.config.auth, 3, Role::HospitalAdmin).unwrap();
        let response = app
            .oneshot(empty_request("GET", "/admin/users", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await["message"],
            "Role hospital_admin is not authorized to access this route"
        );
    }

    #[test]
    fn test_scope_for_role() {
        assert_eq!(
            AdminScope::for_role(Role::HospitalAdmin, Some(4), None),
            Ok(AdminScope::Hospital(4))
        );
        assert_eq!(
            AdminScope::for_role(Role::ShopAdmin, Some(4), None).unwrap_err().0,
            "Shop ID is required for shop admin"
        );
        assert_eq!(
            AdminScope::for_role(Role::User, Some(4), Some(5)),
            Ok(AdminScope::None)
        );
    }

    #[test]
    fn test_account_validation() {
        let account = AccountReq {
            email: Some(" Admin@City.Hospital.org ".into()),
            password: Some("secret1".into()),
            first_name: Some("Ravi".into()),
            last_name: Some("Kumar".into()),
            phone: Some("".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(account.email, "admin@city.hospital.org");
        assert_eq!(account.phone, None);

        let short = AccountReq {
            email: Some("admin@example.com".into()),
            password: Some("123".into()),
            ..Default::default()
        };
        assert_eq!(
            short.validate().unwrap_err().0,
            "Password must be at least 6 characters"
        );
    }
}
