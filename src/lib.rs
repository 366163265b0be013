pub mod config;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::header::{self, HeaderName},
    routing::get,
    Router,
};
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use services::users::UserService;

/// Application state shared across all handlers. `users` is None when the
/// Supabase project is not configured; routes then answer 500.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Option<Arc<UserService>>,
}

pub fn router(state: AppState) -> Router {
    // Permissive CORS: the dashboard may be served from anywhere, and
    // every response — errors included — must be readable cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("apikey"),
            HeaderName::from_static("x-client-info"),
        ]));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/users",
            get(routes::users::list_users)
                .post(routes::users::create_user)
                .fallback(routes::users::method_not_allowed),
        )
        .route(
            "/users/{id}",
            get(routes::users::get_user)
                .patch(routes::users::update_user)
                .delete(routes::users::delete_user)
                .fallback(routes::users::method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Embedded base64 avatars inflate request bodies; 10 MB is ample.
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
}
