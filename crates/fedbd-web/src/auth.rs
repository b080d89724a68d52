//! Password hashing, cookie sessions and CSRF tokens.
//!
//! Sessions live in an in-memory TTL cache keyed by a random id carried in the
//! `fedbd_session` cookie. Each session owns one CSRF token; every state-changing
//! request must echo it back in full.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use fedbd_core::Role;
use fedbd_storage::UserRecord;
use moka::sync::Cache;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const SESSION_COOKIE: &str = "fedbd_session";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const LOGIN_PATH: &str = "/auth/login.php";
pub const PBKDF2_ITERATIONS: u32 = 200_000;

const SESSION_IDLE: Duration = Duration::from_secs(8 * 60 * 60);
const MAX_SESSIONS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user: SessionUser,
    pub csrf_token: String,
}

pub type SessionStore = Cache<String, Session>;

pub fn new_session_store() -> SessionStore {
    Cache::builder()
        .max_capacity(MAX_SESSIONS)
        .time_to_idle(SESSION_IDLE)
        .build()
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn random_token() -> String {
    random_hex(32)
}

pub fn new_salt() -> String {
    random_hex(16)
}

pub fn hash_password(password: &str, salt: &str) -> String {
    hash_password_with(password, salt, PBKDF2_ITERATIONS)
}

/// PBKDF2-HMAC-SHA256, stored as `<iterations>$<hex digest>`.
pub fn hash_password_with(password: &str, salt: &str, iterations: u32) -> String {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);
    format!("{iterations}${}", hex::encode(key))
}

pub fn verify_password(password: &str, salt: &str, stored: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    let Some(iterations) = stored
        .split_once('$')
        .and_then(|(iterations, _)| iterations.parse::<u32>().ok())
        .filter(|iterations| *iterations > 0)
    else {
        return false;
    };
    let candidate = hash_password_with(password, salt, iterations);
    candidate.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Full-token comparison in constant time. An empty expected token never matches.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// Register a fresh session for `user` and return its id.
pub fn start_session(sessions: &SessionStore, user: &UserRecord) -> String {
    let id = random_token();
    sessions.insert(
        id.clone(),
        Session {
            user: SessionUser {
                id: user.id,
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                role: user.role,
            },
            csrf_token: random_token(),
        },
    );
    id
}

pub fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// The signed-in user for this request plus the session's CSRF token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub user: SessionUser,
    pub csrf_token: String,
}

impl RequestContext {
    pub fn has_role(&self, required: Role) -> bool {
        self.user.role.allows(required)
    }

    pub fn csrf_ok(&self, provided: Option<&str>) -> bool {
        provided.is_some_and(|token| tokens_match(&self.csrf_token, token.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// Browser pages go to the login form.
    LoginRequired,
    /// API callers get a JSON 401.
    Unauthorized,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::LoginRequired => Redirect::to(LOGIN_PATH).into_response(),
            AuthRejection::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Authentication required" })),
            )
                .into_response(),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = jar.get(SESSION_COOKIE).and_then(|cookie| {
            let id = cookie.value().to_string();
            state.sessions.get(&id).map(|session| (id, session))
        });
        match session {
            Some((session_id, session)) => Ok(RequestContext {
                session_id,
                user: session.user,
                csrf_token: session.csrf_token,
            }),
            None if parts.uri.path().starts_with("/api/") => Err(AuthRejection::Unauthorized),
            None => Err(AuthRejection::LoginRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip_and_mismatch() {
        let salt = new_salt();
        let stored = hash_password_with("correct horse", &salt, 1_000);
        assert!(stored.starts_with("1000$"));
        assert!(verify_password("correct horse", &salt, &stored));
        assert!(!verify_password("wrong horse", &salt, &stored));
        assert!(!verify_password("correct horse", "other-salt", &stored));
        assert!(!verify_password("", &salt, &stored));
        assert!(!verify_password("correct horse", &salt, "garbage"));
    }

    #[test]
    fn csrf_comparison_requires_the_full_token() {
        let token = random_token();
        assert_eq!(token.len(), 64);
        assert!(tokens_match(&token, &token));
        assert!(!tokens_match(&token, &token[..32]));
        assert!(!tokens_match(&token, ""));
        assert!(!tokens_match("", ""));
    }

    #[test]
    fn sessions_carry_user_and_token() {
        let sessions = new_session_store();
        let user = UserRecord {
            id: 7,
            email: "ops@example.gov".into(),
            display_name: "Ops".into(),
            role: Role::Ops,
            password_salt: String::new(),
            password_hash: String::new(),
        };
        let id = start_session(&sessions, &user);
        let session = sessions.get(&id).unwrap();
        assert_eq!(session.user.role, Role::Ops);
        assert_eq!(session.csrf_token.len(), 64);
        assert_ne!(session.csrf_token, id);
    }
}
