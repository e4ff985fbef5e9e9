use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tracing::Level;

pub mod config;
pub mod error;
pub mod state;
pub mod db;

pub mod crypto {
    pub mod aes;
    pub mod argon2id;
    pub mod session_token;
}

pub mod models {
    pub mod api_key;
    pub mod permission;
    pub mod session;
}

pub mod repositories {
    pub mod session;
}

pub mod services {
    pub mod api_key;
    pub mod continuity;
    pub mod session;
}

pub mod handlers {
    pub mod auth;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod redirect_uri;
}

use repositories::session::SessionStore;
use state::AppState;

/// Builds the HTTP application.
///
/// Every route here sits behind [`middleware_layer::auth::require_session`].
pub fn app<S: SessionStore + 'static>(state: AppState<S>) -> Router {
    let session_routes = Router::new()
        .route("/api-v2/authinfo", get(handlers::auth::auth_info))
        .route("/api-v2/account/session", delete(handlers::auth::logout::<S>))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session::<S>,
        ))
        .with_state(state);

    Router::new()
        .merge(session_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
}
