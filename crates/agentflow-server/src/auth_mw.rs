use axum::body::Body;
use axum::extract::State;
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

const SESSION_COOKIE_NAME: &str = "agentflow_session";

/// Extracts whichever credential the request carries: the `x-api-key`
/// header, or the session cookie set by a prior sign-in. Returns both
/// candidates so the caller can try the admission chain against each
/// independently: a cookie-shaped value would never satisfy the
/// `agentflow_`-prefixed API key check anyway, but trying both keeps the
/// two acceptance paths genuinely independent.
///
/// `pub(crate)` so routes that must authenticate themselves outside the
/// blanket `admission` middleware (e.g. ingest, which has to validate its
/// body before authenticating) can reuse the same extraction logic.
pub(crate) fn extract_candidates(headers: &HeaderMap) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        candidates.push(key.to_string());
    }
    if let Some(cookie_header) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix(&format!("{SESSION_COOKIE_NAME}=")) {
                candidates.push(value.to_string());
            }
        }
    }
    candidates
}

/// Tries every candidate credential against the admission chain in
/// `AppState`, returning the first that admits.
pub(crate) fn admit(state: &AppState, headers: &HeaderMap) -> Option<agentflow_auth::Principal> {
    extract_candidates(headers)
        .iter()
        .find_map(|candidate| state.admission.admit(Some(candidate)).ok())
}

/// Admission middleware applied to every route except `/health`, the
/// realtime pre-upgrade path, and `/api/ingest` — all three perform their
/// own check, in each case because authentication must run in a specific
/// order relative to something else the route does. The chain of
/// verifiers lives in `AppState`, shared by all of them.
pub async fn admission(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    match admit(&state, req.headers()) {
        Some(principal) => {
            req.extensions_mut().insert(principal);
            Ok(next.run(req).await)
        }
        None => Err(ApiError::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("agentflow_abc"));
        assert_eq!(extract_candidates(&headers), vec!["agentflow_abc".to_string()]);
    }

    #[test]
    fn extracts_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; agentflow_session=tok-1; foo=bar"),
        );
        assert_eq!(extract_candidates(&headers), vec!["tok-1".to_string()]);
    }

    #[test]
    fn no_credentials_yields_empty() {
        let headers = HeaderMap::new();
        assert!(extract_candidates(&headers).is_empty());
    }
}
