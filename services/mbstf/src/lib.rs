//! The MBSTF `nmbstf-distsession` HTTP service: axum router, application
//! state, and YAML configuration loading. `main.rs` is just process
//! bootstrap; everything routable lives here so integration tests can build
//! the router directly.

pub mod config;
pub mod http;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::http::dist_sessions::{
    create_dist_session, delete_dist_session, dist_sessions_method_not_allowed, get_dist_session,
    unmatched_resource,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/nmbstf-distsession/v1/dist-sessions",
            post(create_dist_session).fallback(dist_sessions_method_not_allowed),
        )
        .route(
            "/nmbstf-distsession/v1/dist-sessions/{id}",
            get(get_dist_session)
                .delete(delete_dist_session)
                .fallback(dist_sessions_method_not_allowed),
        )
        .fallback(unmatched_resource)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
