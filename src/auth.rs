//! Token issuing/verification and the request guards that resolve the caller.
//!
//! A request is in one of three states: no `Authorization` header, a header
//! carrying a valid token, or a header carrying anything else. Routes that
//! require a caller take [`CurrentUser`]; routes where the caller only changes
//! derived fields take [`MaybeUser`]. A bad token is rejected by both.

use crate::config::Config;
use crate::db::DbConnection;
use crate::errors;
use crate::types::ApiError;
use crate::users::models::User;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use log::{error, warn};
use rocket::outcome::Outcome;
use rocket::request::{self, FromRequest, Request};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

const SCHEME: &str = "Token ";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: i32,
    exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            TokenError::Malformed => "malformed token",
            TokenError::BadSignature => "token signature mismatch",
            TokenError::Expired => "token expired",
        };
        f.write_str(reason)
    }
}

/// Issues and verifies HS256 identity tokens.
#[derive(Clone)]
pub struct TokenService {
    key: Hmac<Sha256>,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> errors::Result<TokenService> {
        let key = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| errors::Error::from("token secret rejected by HMAC"))?;
        Ok(TokenService { key, ttl })
    }

    pub fn from_config(config: &Config) -> errors::Result<TokenService> {
        TokenService::new(&config.secret_key, config.token_ttl)
    }

    pub fn issue(&self, user_id: i32) -> Result<String, ApiError> {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: i32, now: DateTime<Utc>) -> Result<String, ApiError> {
        let claims = Claims {
            id: user_id,
            exp: (now + self.ttl).timestamp(),
        };
        claims.sign_with_key(&self.key).map_err(|e| {
            error!("failed to sign token: {}", e);
            ApiError::Internal
        })
    }

    pub fn verify(&self, token: &str) -> Result<i32, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<i32, TokenError> {
        let claims: Claims = token.verify_with_key(&self.key).map_err(|e| match e {
            jwt::Error::InvalidSignature | jwt::Error::RustCryptoMac(_) => TokenError::BadSignature,
            _ => TokenError::Malformed,
        })?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims.id)
    }
}

/// What the `Authorization` header says about the caller.
#[derive(Debug, PartialEq)]
pub enum Credentials {
    NoToken,
    Valid(i32),
    Invalid(TokenError),
}

impl Credentials {
    pub fn read(header: Option<&str>, tokens: &TokenService) -> Credentials {
        let header = match header {
            Some(header) => header,
            None => return Credentials::NoToken,
        };
        let token = match header.strip_prefix(SCHEME) {
            Some(token) if !token.trim().is_empty() => token.trim(),
            _ => return Credentials::Invalid(TokenError::Malformed),
        };
        match tokens.verify(token) {
            Ok(user_id) => Credentials::Valid(user_id),
            Err(e) => Credentials::Invalid(e),
        }
    }
}

/// Resolves the caller. `required` decides whether a missing header is an
/// error; an invalid token always is.
async fn authenticate(request: &Request<'_>, required: bool) -> Result<Option<User>, ApiError> {
    let tokens = request.rocket().state::<TokenService>().ok_or_else(|| {
        error!("TokenService is not managed");
        ApiError::Internal
    })?;

    let user_id = match Credentials::read(request.headers().get_one("Authorization"), tokens) {
        Credentials::NoToken if required => return Err(ApiError::unauthorized("is missing")),
        Credentials::NoToken => return Ok(None),
        Credentials::Invalid(reason) => {
            warn!("rejected token on {} {}: {}", request.method(), request.uri(), reason);
            return Err(ApiError::unauthorized("is invalid"));
        }
        Credentials::Valid(user_id) => user_id,
    };

    let mut connection = match request.guard::<DbConnection>().await {
        Outcome::Success(connection) => connection,
        _ => return Err(ApiError::Internal),
    };
    match User::load_by_id(user_id, &mut connection)? {
        Some(user) => Ok(Some(user)),
        None => {
            warn!("token for unknown user {}", user_id);
            Err(ApiError::unauthorized("is invalid"))
        }
    }
}

fn into_outcome<T>(result: Result<T, ApiError>) -> request::Outcome<T, ApiError> {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(e) => {
            let status = e.status();
            Outcome::Error((status, e))
        }
    }
}

/// The authenticated caller of a route that requires one.
pub type CurrentUser = Result<User, ApiError>;

/// The caller of a route where authentication is optional.
pub type MaybeUser = Result<Viewer, ApiError>;

#[derive(Debug)]
pub struct Viewer(pub Option<User>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let result = authenticate(request, true)
            .await
            .and_then(|user| user.ok_or_else(|| ApiError::unauthorized("is missing")));
        into_outcome(result)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Viewer {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        into_outcome(authenticate(request, false).await.map(Viewer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("conduit-test-secret", Duration::hours(24)).unwrap()
    }

    #[test]
    fn issued_token_resolves_to_user() {
        let tokens = service();
        let token = tokens.issue(42).unwrap();
        assert_eq!(token.matches('.').count(), 2);
        assert_eq!(tokens.verify(&token), Ok(42));
    }

    #[test]
    fn token_fails_after_expiry() {
        let tokens = service();
        let issued = Utc::now();
        let token = tokens.issue_at(7, issued).unwrap();

        assert_eq!(tokens.verify_at(&token, issued + Duration::hours(23)), Ok(7));
        assert_eq!(
            tokens.verify_at(&token, issued + Duration::hours(24)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let tokens = service();
        let token = tokens.issue(1).unwrap();
        assert!(tokens.verify(&format!("{}tampered", token)).is_err());

        let other = TokenService::new("wrong-secret", Duration::hours(24)).unwrap();
        let foreign = other.issue(1).unwrap();
        assert_eq!(tokens.verify(&foreign), Err(TokenError::BadSignature));

        // Someone else's claims under this token's signature.
        let other = tokens.issue(2).unwrap();
        let ours: Vec<&str> = token.split('.').collect();
        let theirs: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", theirs[0], theirs[1], ours[2]);
        assert_eq!(tokens.verify(&forged), Err(TokenError::BadSignature));

        assert_eq!(tokens.verify("invalid.token.here"), Err(TokenError::Malformed));
        assert_eq!(tokens.verify("randomstring123"), Err(TokenError::Malformed));
    }

    #[test]
    fn header_states() {
        let tokens = service();
        let token = tokens.issue(9).unwrap();

        assert_eq!(Credentials::read(None, &tokens), Credentials::NoToken);
        assert_eq!(
            Credentials::read(Some(&format!("Token {}", token)), &tokens),
            Credentials::Valid(9)
        );
        assert_eq!(
            Credentials::read(Some(&format!("Bearer {}", token)), &tokens),
            Credentials::Invalid(TokenError::Malformed)
        );
        assert_eq!(
            Credentials::read(Some("Token "), &tokens),
            Credentials::Invalid(TokenError::Malformed)
        );
    }
}
