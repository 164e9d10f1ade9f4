use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use rand::Rng;

const USER_COOKIE: &str = "user_id";

/// Opaque per-client identity, manufactured at the HTTP boundary and passed
/// into every room operation. The core never reads request state itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolves the caller's identity from the cookie jar, minting a fresh one
/// when absent, and returns the jar with the cookie (re)applied.
pub fn resolve_user(jar: CookieJar) -> (UserId, CookieJar) {
    let user = match jar.get(USER_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => UserId(cookie.value().to_string()),
        _ => mint_user_id(),
    };

    let mut cookie = Cookie::new(USER_COOKIE, user.0.clone());
    cookie.set_path("/");
    let jar = jar.add(cookie);

    (user, jar)
}

fn mint_user_id() -> UserId {
    let suffix: u32 = rand::rng().random_range(1000..10000);
    UserId(format!("user_{}_{}", Utc::now().timestamp(), suffix))
}
