use diesel::result::Error as DieselError;
use diesel::SqliteConnection;
use lazy_static::lazy_static;
use log::error;
use regex::Regex;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::status::Custom;
use rocket::response::{self, Responder};
use rocket::serde::json::{self, Json};
use serde::Serialize;
use serde_json::error::Category;
use serde_json::json;
use std::collections::BTreeMap;

/// Binds a payload into a draft entity and checks the draft's constraints.
pub trait Validate
where
    Self: Sized,
{
    type Draft;
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError>;
}

#[derive(Debug)]
pub enum ApiError {
    Diesel(DieselError),
    Validation(FieldErrors),
    BadRequest(FieldErrors),
    NotFound(FieldErrors),
    Forbidden(FieldErrors),
    Unauthorized(FieldErrors),
    Internal,
}

impl ApiError {
    pub fn not_found<K: Into<String>, V: Into<String>>(key: K, reason: V) -> ApiError {
        ApiError::NotFound(FieldErrors::from(key, reason))
    }

    pub fn forbidden<K: Into<String>, V: Into<String>>(key: K, reason: V) -> ApiError {
        ApiError::Forbidden(FieldErrors::from(key, reason))
    }

    pub fn unauthorized<V: Into<String>>(reason: V) -> ApiError {
        ApiError::Unauthorized(FieldErrors::from("token", reason))
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::Diesel(DieselError::NotFound) => Status::NotFound,
            ApiError::Diesel(_) | ApiError::Internal => Status::InternalServerError,
            ApiError::Validation(_) => Status::UnprocessableEntity,
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::Unauthorized(_) => Status::Unauthorized,
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        ApiError::Diesel(err)
    }
}

impl From<FieldErrors> for ApiError {
    fn from(err: FieldErrors) -> ApiError {
        ApiError::Validation(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
pub type Created<T> = Result<Custom<Json<T>>, ApiError>;

pub fn created<T>(value: T) -> Custom<Json<T>> {
    Custom(Status::Created, Json(value))
}

/// Field name to reasons, serialized as the body of every error response.
#[derive(Debug, Serialize, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = FieldErrors::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(|v| v.as_slice())
    }

    /// `Ok(())` when nothing was recorded, otherwise a 422.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }

    pub fn check_present(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.add_error(field, "can't be blank");
            false
        } else {
            true
        }
    }

    pub fn check_length(&mut self, field: &str, value: &str, min: Option<usize>, max: Option<usize>) {
        let len = value.chars().count();
        if let Some(min) = min {
            if len < min {
                self.add_error(
                    field,
                    format!("is too short (minimum is {} characters)", min),
                );
            }
        }
        if let Some(max) = max {
            if len > max {
                self.add_error(
                    field,
                    format!("is too long (maximum is {} characters)", max),
                );
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let errors = match self {
            ApiError::Diesel(DieselError::NotFound) => FieldErrors::from("entity", "not found"),
            ApiError::Diesel(e) => {
                error!("database error on {} {}: {}", req.method(), req.uri(), e);
                FieldErrors::from("database", "internal error")
            }
            ApiError::Internal => {
                error!("internal error on {} {}", req.method(), req.uri());
                FieldErrors::from("server", "internal error")
            }
            ApiError::Validation(e)
            | ApiError::BadRequest(e)
            | ApiError::NotFound(e)
            | ApiError::Forbidden(e)
            | ApiError::Unauthorized(e) => e,
        };
        (status, Json(json!({ "errors": errors }))).respond_to(req)
    }
}

/// A JSON request body as handed to a handler: either the decoded value or
/// the reason it could not be decoded.
pub type Payload<'r, T> = Result<Json<T>, json::Error<'r>>;

lazy_static! {
    static ref MISSING_FIELD_RE: Regex = Regex::new(r"missing field `(\w+)`").unwrap();
}

/// Unwraps a request body. Bodies that are not JSON at all are a 400;
/// JSON of the wrong shape is a 422 keyed by the offending field.
pub fn bind<T>(payload: Payload<'_, T>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(json::Error::Io(e)) => Err(ApiError::BadRequest(FieldErrors::from(
            "body",
            format!("could not read request body: {}", e),
        ))),
        Err(json::Error::Parse(_, e)) => match e.classify() {
            Category::Data => {
                let message = e.to_string();
                let errors = match MISSING_FIELD_RE.captures(&message) {
                    Some(caps) => FieldErrors::from(&caps[1], "can't be blank"),
                    None => FieldErrors::from("request", message),
                };
                Err(ApiError::Validation(errors))
            }
            Category::Syntax | Category::Eof | Category::Io => Err(ApiError::BadRequest(
                FieldErrors::from("body", format!("malformed JSON: {}", e)),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_accumulate_per_field() {
        let mut errors = FieldErrors::from("title", "can't be blank");
        errors.add_error("title", "is too short (minimum is 4 characters)");
        errors.add_error("body", "can't be blank");

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("title").unwrap().len(), 2);
        assert_eq!(errors.get("body").unwrap(), ["can't be blank".to_string()]);
    }

    #[test]
    fn length_checks_count_characters() {
        let mut errors = FieldErrors::default();
        errors.check_length("title", "ééé", Some(4), None);
        assert!(errors.get("title").is_some());

        let mut errors = FieldErrors::default();
        errors.check_length("title", "éééé", Some(4), Some(4));
        assert!(errors.empty());
    }

    #[test]
    fn serializes_as_field_to_reasons() {
        let errors = FieldErrors::from("body", "is too long (maximum is 2048 characters)");
        let value = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            value,
            json!({ "body": ["is too long (maximum is 2048 characters)"] })
        );
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::unauthorized("x").status(), Status::Unauthorized);
        assert_eq!(ApiError::forbidden("a", "b").status(), Status::Forbidden);
        assert_eq!(ApiError::not_found("a", "b").status(), Status::NotFound);
        assert_eq!(
            ApiError::from(FieldErrors::from("a", "b")).status(),
            Status::UnprocessableEntity
        );
        assert_eq!(ApiError::Diesel(DieselError::NotFound).status(), Status::NotFound);
        assert_eq!(
            ApiError::Diesel(DieselError::RollbackTransaction).status(),
            Status::InternalServerError
        );
    }
}
