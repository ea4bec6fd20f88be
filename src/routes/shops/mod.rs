//! Routes for shop admins, scoped to the admin's own shop through
//! [`ShopScope`](crate::core::middleware::ShopScope).

pub mod inventory;
pub mod orders;
pub mod profile;
pub mod stats;

use utoipa_axum::router::OpenApiRouter;

use crate::core::{app_state::AppState, middleware};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/shop",
        OpenApiRouter::new()
            .merge(
                OpenApiRouter::new()
                    .merge(profile::routes())
                    .merge(inventory::routes())
                    .merge(orders::routes())
                    .merge(stats::routes())
                    .route_layer(axum::middleware::from_fn_with_state(
                        state.clone(),
                        middleware::shop_admins_authorization,
                    )),
            )
            .merge(profile::status_routes().route_layer(
                axum::middleware::from_fn_with_state(
                    state,
                    middleware::shop_admins_any_status_authorization,
                ),
            )),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::core::{
        auth::{self, Role},
        test_support::{empty_request, test_state},
    };

    #[tokio::test]
    async fn test_hospital_admin_cannot_manage_inventory() {
        let state = test_state();
        let token = auth::issue_token(&state.config.auth, 5, Role::HospitalAdmin).unwrap();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();

        let response = router
            .with_state(state)
            .oneshot(empty_request("GET", "/shop/inventory", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_orders_and_status_toggle_require_a_token() {
        let state = test_state();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();
        let router = router.with_state(state);

        for (method, uri) in [
            ("GET", "/shop/orders"),
            ("GET", "/shop/stats"),
            ("PATCH", "/shop/status"),
        ] {
            let response = router
                .clone()
                .oneshot(empty_request(method, uri, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }
}
