use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::models::{Id, User};
use crate::routes::AppState;

pub const SESSION_COOKIE: &str = "trustlog_session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// users.id
    pub sub: Id,
    pub username: String,
    pub exp: usize,
}

/// Salted Argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            log::error!("unreadable password hash in users table: {e}");
            false
        }
    }
}

/// Sign a session token for `user`, valid for the configured lifetime.
pub fn create_session_token(cfg: &SessionConfig, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(cfg.ttl_hours)).timestamp() as usize;
    let claims = Claims { sub: user.id, username: user.username.clone(), exp: expiration };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(cfg.secret.as_bytes()))
}

/// Validate a session token and return its claims.
pub fn decode_session_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

pub fn session_cookie(cfg: &SessionConfig, token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cfg.secure_cookie)
        .max_age(time::Duration::hours(cfg.ttl_hours))
        .finish()
}

/// Expired, empty cookie that makes the browser forget the session.
pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, "").path("/").http_only(true).finish();
    cookie.make_removal();
    cookie
}

/// Extractor for the signed-in identity. Reads the session cookie first,
/// then an `Authorization: Bearer` header. Use `Option<Auth>` where a
/// session is optional.
#[derive(Debug, Clone)]
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Id {
        self.0.sub
    }

    pub fn username(&self) -> &str {
        &self.0.username
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            log::error!("AppState not registered; cannot check sessions");
            return ready(Err(ApiError::Internal));
        };
        let secret = &state.config.session.secret;
        let cookie = req
            .cookie(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        let bearer = BearerAuth::from_request(req, pl)
            .into_inner()
            .ok()
            .map(|b| b.token().to_string());
        if cookie.is_none() && bearer.is_none() {
            return ready(Err(ApiError::Unauthorized("Authentication required".into())));
        }
        // a stale cookie must not shadow a valid header
        let claims = cookie
            .into_iter()
            .chain(bearer)
            .find_map(|token| decode_session_token(secret, &token).ok());
        ready(claims.map(Auth).ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".into())))
    }
}
