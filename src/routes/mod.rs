pub mod admin;
pub mod auth;
pub mod hospitals;
pub mod public;
pub mod shops;

use utoipa_axum::router::OpenApiRouter;

use crate::core::app_state::AppState;

/// Every API router, each behind its own authorization layer.
pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .merge(auth::routes_with_openapi(state.clone()))
        .merge(public::routes_with_openapi(state.clone()))
        .merge(hospitals::routes_with_openapi(state.clone()))
        .merge(shops::routes_with_openapi(state.clone()))
        .merge(admin::routes_with_openapi(state))
}
