use crate::auth::{CurrentUser, TokenService};
use crate::config::Config;
use crate::db::DbConnection;
use crate::types::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use log::info;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};

pub mod models;
mod utils;

use self::models::{NewUser, User};
use self::utils::*;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    user: UserView,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    email: String,
    token: String,
    username: String,
    bio: Option<String>,
    image: Option<String>,
}

impl UserResponse {
    fn new(user: User, tokens: &TokenService) -> Result<UserResponse, ApiError> {
        Ok(UserResponse {
            user: UserView {
                token: tokens.issue(user.id)?,
                email: user.email,
                username: user.username,
                bio: user.bio,
                image: user.image,
            },
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    type Draft = RegistrationDetails;

    fn validate(self, connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let mut details = self.user;
        details.email = normalize_email(&details.email);
        let mut errors = FieldErrors::default();
        validate_username(&details.username, &mut errors);
        validate_email(&details.email, &mut errors);
        validate_password(&details.password, &mut errors);

        if User::username_taken(&details.username, None, connection)? {
            errors.add_error("username", "has already been taken");
        }
        if User::email_taken(&details.email, None, connection)? {
            errors.add_error("email", "has already been taken");
        }

        errors.into_result()?;
        Ok(details)
    }
}

/// A unique-index violation that slipped past the up-front checks.
fn unique_violation(err: DieselError) -> ApiError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            // SQLite names the column: "UNIQUE constraint failed: users.email".
            let field = if info.message().contains("users.email") {
                "email"
            } else {
                "username"
            };
            FieldErrors::from(field, "has already been taken").into()
        }
        other => other.into(),
    }
}

#[post("/users", data = "<registration>")]
pub fn register(
    mut connection: DbConnection,
    config: &State<Config>,
    tokens: &State<TokenService>,
    registration: Payload<'_, Registration>,
) -> Created<UserResponse> {
    let details = bind(registration)?.validate(&mut connection)?;
    let password_hash = models::hash_password(&details.password, config.password_rounds)?;
    let new_user = NewUser {
        username: &details.username,
        email: &details.email,
        password_hash: &password_hash,
    };
    let user = User::create(&new_user, &mut connection).map_err(unique_violation)?;
    info!("registered user {} ({})", user.username, user.id);
    Ok(created(UserResponse::new(user, tokens)?))
}

#[derive(Debug, Deserialize)]
pub struct LoginDetails {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

impl Validate for Login {
    type Draft = LoginDetails;

    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let mut details = self.user;
        details.email = normalize_email(&details.email);
        let mut errors = FieldErrors::default();
        validate_email(&details.email, &mut errors);
        validate_password(&details.password, &mut errors);
        errors.into_result()?;
        Ok(details)
    }
}

#[post("/users/login", data = "<login>")]
pub fn login(
    mut connection: DbConnection,
    tokens: &State<TokenService>,
    login: Payload<'_, Login>,
) -> ApiResult<UserResponse> {
    let login = bind(login)?.validate(&mut connection)?;
    let rejected = || ApiError::forbidden("login", "Not Registered email or invalid password");

    let user = User::load_by_email(&login.email, &mut connection)?.ok_or_else(rejected)?;
    if !user.verify_password(&login.password) {
        return Err(rejected());
    }
    Ok(Json(UserResponse::new(user, tokens)?))
}

#[get("/user")]
pub fn current(user: CurrentUser, tokens: &State<TokenService>) -> ApiResult<UserResponse> {
    Ok(Json(UserResponse::new(user?, tokens)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

/// An update checked against the account it applies to.
struct UserUpdate {
    current: User,
    update: UpdateUser,
}

impl Validate for UserUpdate {
    type Draft = (User, Option<String>);

    fn validate(self, connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let UserUpdate { mut current, update } = self;
        let mut errors = FieldErrors::default();

        if let Some(new_username) = update.username {
            validate_username(&new_username, &mut errors);
            if User::username_taken(&new_username, Some(current.id), connection)? {
                errors.add_error("username", "has already been taken");
            }
            current.username = new_username;
        }

        if let Some(new_email) = update.email.as_deref().map(normalize_email) {
            validate_email(&new_email, &mut errors);
            if User::email_taken(&new_email, Some(current.id), connection)? {
                errors.add_error("email", "has already been taken");
            }
            current.email = new_email;
        }

        if let Some(password) = &update.password {
            validate_password(password, &mut errors);
        }

        // Empty strings clear optional profile fields.
        if let Some(image) = update.image {
            if image.is_empty() {
                current.image = None;
            } else {
                validate_image(&image, &mut errors);
                current.image = Some(image);
            }
        }
        if let Some(bio) = update.bio {
            current.bio = if bio.is_empty() { None } else { Some(bio) };
        }

        errors.into_result()?;
        Ok((current, update.password))
    }
}

#[put("/user", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    config: &State<Config>,
    tokens: &State<TokenService>,
    update: Payload<'_, Update>,
) -> ApiResult<UserResponse> {
    let current = current_user?;
    let update = bind(update)?;
    let (mut user, password) = UserUpdate {
        current,
        update: update.user,
    }
    .validate(&mut connection)?;

    if let Some(password) = password {
        user.set_password(&password, config.password_rounds)?;
    }
    user.save(&mut connection).map_err(unique_violation)?;
    info!("updated user {} ({})", user.username, user.id);
    Ok(Json(UserResponse::new(user, tokens)?))
}
