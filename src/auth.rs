use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use utoipa::ToSchema;

use crate::error::ApiError;

/// Cookie carrying the short-lived access token.
pub const ACCESS_COOKIE: &str = "blh_session";
/// Cookie carrying the long-lived refresh token.
pub const REFRESH_COOKIE: &str = "blh_refresh";

const DEFAULT_ACCESS_TTL_SECS: i64 = 3600; // 1 hour
const DEFAULT_REFRESH_TTL_SECS: i64 = 604_800; // 7 days

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    /// Fixed hierarchy rank: user=1, manager=2, admin=3.
    pub fn rank(self) -> u8 {
        match self {
            Role::User => 1,
            Role::Manager => 2,
            Role::Admin => 3,
        }
    }

    /// A role grants access to everything at or below its rank.
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Parse the lowercase wire form; anything else is rejected.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Where a fresh session lands: admins get the admin area, everyone
    /// else the public site.
    pub fn landing_destination(self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            _ => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub role: Role,
    pub kind: TokenKind,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<crate::models::Id, ApiError> {
        self.sub.parse().map_err(|_| ApiError::Unauthorized)
    }
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("AUTH_SECRET").expect("AUTH_SECRET not set");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Validate a refresh token; access tokens are refused here just as the
/// extractor refuses refresh tokens.
pub fn verify_refresh(token: &str) -> Option<Claims> {
    decode_jwt(token).ok().filter(|c| c.kind == TokenKind::Refresh)
}

pub fn access_ttl_secs() -> i64 {
    env::var("ACCESS_TOKEN_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_ACCESS_TTL_SECS)
}

pub fn refresh_ttl_secs() -> i64 {
    env::var("REFRESH_TOKEN_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_TTL_SECS)
}

/// Create a JWT for a user. Access and refresh tokens share the claim shape
/// and differ in `kind` and lifetime; the extractor only accepts access
/// tokens, so a leaked refresh cookie cannot be replayed against the API.
pub fn create_jwt(
    user_id: crate::models::Id,
    name: &str,
    role: Role,
    kind: TokenKind,
) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("AUTH_SECRET").expect("AUTH_SECRET not set");
    let ttl = match kind {
        TokenKind::Access => access_ttl_secs(),
        TokenKind::Refresh => refresh_ttl_secs(),
    };
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::seconds(ttl))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        name: name.to_string(),
        role,
        kind,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Build the session cookie pair for a user.
pub fn session_cookies(
    user_id: crate::models::Id,
    name: &str,
    role: Role,
) -> Result<(Cookie<'static>, Cookie<'static>), jsonwebtoken::errors::Error> {
    let access = create_jwt(user_id, name, role, TokenKind::Access)?;
    let refresh = create_jwt(user_id, name, role, TokenKind::Refresh)?;
    Ok((access_cookie(access), refresh_cookie(refresh)))
}

pub fn access_cookie(token: String) -> Cookie<'static> {
    Cookie::build(ACCESS_COOKIE, token)
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(access_ttl_secs()))
        .finish()
}

fn refresh_cookie(token: String) -> Cookie<'static> {
    Cookie::build(REFRESH_COOKIE, token)
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(refresh_ttl_secs()))
        .finish()
}

/// Expired replacements used by logout.
pub fn clearing_cookies() -> (Cookie<'static>, Cookie<'static>) {
    let kill = |name: &'static str| {
        Cookie::build(name, "")
            .path("/")
            .http_only(true)
            .secure(true)
            .max_age(CookieDuration::ZERO)
            .finish()
    };
    (kill(ACCESS_COOKIE), kill(REFRESH_COOKIE))
}

fn claims_from_request(req: &HttpRequest, pl: &mut Payload) -> Option<Claims> {
    // Bearer header wins; browser sessions fall back to the access cookie.
    if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
        if let Ok(claims) = decode_jwt(bearer.token()) {
            return Some(claims);
        }
        return None;
    }
    let cookie = req.cookie(ACCESS_COOKIE)?;
    decode_jwt(cookie.value()).ok()
}

/// Extractor yielding validated `Claims` for an active session.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        match claims_from_request(req, pl) {
            Some(claims) if claims.kind == TokenKind::Access => ready(Ok(Auth(claims))),
            _ => ready(Err(ApiError::Unauthorized.into())),
        }
    }
}

/// Never-failing variant for pages that render differently with a session.
pub struct MaybeAuth(pub Option<Claims>);

impl FromRequest for MaybeAuth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let claims = claims_from_request(req, pl).filter(|c| c.kind == TokenKind::Access);
        ready(Ok(MaybeAuth(claims)))
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:expr) => {
        if !$auth.0.role.satisfies($role) {
            return Err($crate::error::ApiError::Forbidden(
                "Insufficient role".to_string(),
            ));
        }
    };
}

/// Emails granted the admin role when their account is first created,
/// from BOOTSTRAP_ADMIN_EMAILS (comma separated).
pub fn is_bootstrap_admin(email: &str) -> bool {
    let list = std::env::var("BOOTSTRAP_ADMIN_EMAILS").unwrap_or_default();
    list.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .any(|s| s.eq_ignore_ascii_case(email))
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ranks_are_ordered() {
        assert!(Role::Admin.satisfies(Role::Manager));
        assert!(Role::Admin.satisfies(Role::User));
        assert!(Role::Manager.satisfies(Role::User));
        assert!(!Role::User.satisfies(Role::Manager));
        assert!(!Role::Manager.satisfies(Role::Admin));
        assert!(Role::User.satisfies(Role::User));
    }

    #[test]
    fn role_parse_rejects_unknown() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("manager"), Some(Role::Manager));
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("Admin"), None);
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn landing_destination_by_role() {
        assert_eq!(Role::Admin.landing_destination(), "/admin");
        assert_eq!(Role::Manager.landing_destination(), "/");
        assert_eq!(Role::User.landing_destination(), "/");
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(verify_password("hunter2hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("hunter2hunter2", "not-a-phc-string"));
    }
}
