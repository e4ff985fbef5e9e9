use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use tower_cookies::cookie::time::Duration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, Result},
    models::session::SessionMetadata,
    repositories::session::SessionStore,
    services::session as session_service,
    state::AppState,
};

/// The cookie carrying the session token.
pub const SESSION_COOKIE: &str = "BEARER";
/// A login-flow cookie that is obsolete once a request is authenticated.
pub const REDIRECT_URI_COOKIE: &str = "REDIRECT_URI";

const VIEWER_LATITUDE_HEADER: &str = "cloudfront-viewer-latitude";
const VIEWER_LONGITUDE_HEADER: &str = "cloudfront-viewer-longitude";

/// Reads the viewer location the CDN attached to the request.
///
/// # Arguments
///
/// * `headers` - The request headers.
///
/// # Returns
///
/// The location, or `None` if either coordinate is missing or not a number.
pub fn observed_location(headers: &HeaderMap) -> Option<SessionMetadata> {
    let coordinate = |name: &str| -> Option<f64> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    };

    Some(SessionMetadata {
        lat: coordinate(VIEWER_LATITUDE_HEADER)?,
        lng: coordinate(VIEWER_LONGITUDE_HEADER)?,
    })
}

/// Whether the request reached us over HTTPS, possibly through a proxy.
fn is_secure_request(headers: &HeaderMap) -> bool {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    };

    header("x-forwarded-proto").eq_ignore_ascii_case("https")
        || header("forwarded").contains("proto=https")
}

/// Creates the session cookie for a refreshed token.
pub fn session_cookie(
    token: String,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    cookie.set_max_age(Duration::seconds(
        (expires_at - Utc::now()).num_seconds().max(0),
    ));

    cookie
}

/// Removes a cookie from the client.
pub fn remove_cookie(cookies: &Cookies, name: &'static str) {
    let mut cookie = Cookie::new(name, "");
    cookie.set_max_age(Duration::seconds(0));
    cookie.set_path("/");
    cookies.remove(cookie);
}

/// A middleware that requires a valid session to be present.
///
/// Every authenticated request refreshes the session: the token is
/// re-issued and the stored location is moved to the current one. Any
/// failure removes the session cookie and answers 401.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an `AppError::InvalidSession`.
pub async fn require_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking session...");

    let token = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::debug!("❌ No {} cookie found", SESSION_COOKIE);
            AppError::InvalidSession
        })?;

    let observed = observed_location(request.headers());
    let refreshed = match session_service::refresh_session(
        state.codec.as_ref(),
        state.store.as_ref(),
        &token,
        observed,
        Utc::now(),
        state.session_lifetime(),
    )
    .await
    {
        Ok(refreshed) => refreshed,
        Err(e) => {
            remove_cookie(&cookies, SESSION_COOKIE);
            return Err(e);
        }
    };

    let secure = state.config.secure_cookies || is_secure_request(request.headers());
    cookies.add(session_cookie(refreshed.token, refreshed.expires_at, secure));

    if cookies.get(REDIRECT_URI_COOKIE).is_some() {
        remove_cookie(&cookies, REDIRECT_URI_COOKIE);
    }

    tracing::debug!("✅ Session authenticated: {}", refreshed.session.id);
    request.extensions_mut().insert(refreshed.session);

    Ok(next.run(request).await)
}
