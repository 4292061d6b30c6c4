use crate::auth::{CurrentUser, MaybeUser};
use crate::db::DbConnection;
use crate::types::*;
use crate::users::models::User;
use log::info;
use rocket::serde::json::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub username: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub following: bool,
}

fn load_profile_owner(name: &str, connection: &mut DbConnection) -> Result<User, ApiError> {
    User::load_by_name(name, connection)?
        .ok_or_else(|| ApiError::not_found("profile", "Invalid username"))
}

#[get("/profiles/<name>")]
pub fn profile(viewer: MaybeUser, mut connection: DbConnection, name: &str) -> ApiResult<ProfileResponse> {
    let viewer = viewer?.0;
    let user = load_profile_owner(name, &mut connection)?;
    let following = match viewer {
        Some(current) => current.is_following(user.id, &mut connection)?,
        None => false,
    };

    Ok(Json(ProfileResponse {
        profile: user.profile(following),
    }))
}

#[post("/profiles/<name>/follow")]
pub fn follow(current_user: CurrentUser, mut connection: DbConnection, name: &str) -> ApiResult<ProfileResponse> {
    let current = current_user?;
    let followed = load_profile_owner(name, &mut connection)?;
    if followed.id == current.id {
        return Err(FieldErrors::from("profile", "cannot follow yourself").into());
    }
    current.follow(&followed, &mut connection)?;
    info!("{} follows {}", current.username, followed.username);

    Ok(Json(ProfileResponse {
        profile: followed.profile(true),
    }))
}

#[delete("/profiles/<name>/follow")]
pub fn unfollow(current_user: CurrentUser, mut connection: DbConnection, name: &str) -> ApiResult<ProfileResponse> {
    let current = current_user?;
    let followed = load_profile_owner(name, &mut connection)?;
    current.unfollow(&followed, &mut connection)?;
    info!("{} unfollows {}", current.username, followed.username);

    Ok(Json(ProfileResponse {
        profile: followed.profile(false),
    }))
}
