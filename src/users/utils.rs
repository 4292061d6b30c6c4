use crate::types::FieldErrors;
use lazy_static::lazy_static;
use regex::Regex;

pub const USERNAME_MIN: usize = 4;
pub const USERNAME_MAX: usize = 255;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 255;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
    static ref URL_RE: Regex = Regex::new(r"\Ahttps?://[^\s/$.?#][^\s]*\z").unwrap();
}

/// Emails are stored and looked up in this form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str, errors: &mut FieldErrors) {
    if !errors.check_present("email", email) {
        return;
    }
    if !EMAIL_RE.is_match(email) {
        errors.add_error("email", "is invalid");
    }
}

pub fn validate_username(username: &str, errors: &mut FieldErrors) {
    if !errors.check_present("username", username) {
        return;
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.add_error("username", "must contain only letters and digits");
    }
    errors.check_length("username", username, Some(USERNAME_MIN), Some(USERNAME_MAX));
}

pub fn validate_password(password: &str, errors: &mut FieldErrors) {
    if !errors.check_present("password", password) {
        return;
    }
    errors.check_length("password", password, Some(PASSWORD_MIN), Some(PASSWORD_MAX));
}

pub fn validate_image(image: &str, errors: &mut FieldErrors) {
    if !URL_RE.is_match(image) {
        errors.add_error("image", "must be an http(s) URL");
    }
}
