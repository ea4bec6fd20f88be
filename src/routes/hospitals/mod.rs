//! Routes for hospital admins. Every handler is scoped to the admin's own
//! hospital through [`HospitalScope`](crate::core::middleware::HospitalScope).

pub mod appointments;
pub mod profile;

use utoipa_axum::router::OpenApiRouter;

use crate::core::{app_state::AppState, middleware};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/hospital",
        OpenApiRouter::new()
            .merge(profile::routes())
            .merge(appointments::routes())
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                middleware::hospital_admins_authorization,
            )),
    )
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::core::{
        auth::{self, Role},
        test_support::{body_json, empty_request, test_state},
    };

    fn app() -> (Router, AppState) {
        let state = test_state();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();
        (router.with_state(state.clone()), state)
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (app, _) = app();
        let response = app
            .oneshot(empty_request("GET", "/hospital/appointments", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejects_other_roles() {
        let (app, state) = app();
        let token = auth::issue_token(&state.config.auth, 1, Role::ShopAdmin).unwrap();
        let response = app
            .oneshot(empty_request("GET", "/hospital/profile", Some(&token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(
            body["message"],
            "Role shop_admin is not authorized to access this route"
        );
    }
}
