#[macro_use]
extern crate rocket;
#[macro_use]
extern crate error_chain;

mod article;
mod auth;
mod comment;
mod config;
mod db;
mod errors;
mod profile;
mod tags;
mod types;
mod users;
mod utils;


use crate::config::Config;
use error_chain::ChainedError;
use rocket::fairing::AdHoc;
use rocket::http::uri::Origin;
use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::Json;
use rocket::{Build, Rocket};
use serde_json::{json, Value};

fn error_body(key: &str, reason: &str) -> Json<Value> {
    Json(json!({ "errors": { key: [reason] } }))
}

#[catch(400)]
fn bad_request(_req: &Request) -> (Status, Json<Value>) {
    (Status::BadRequest, error_body("body", "bad request"))
}

#[catch(401)]
fn unauthorized(_req: &Request) -> (Status, Json<Value>) {
    (Status::Unauthorized, error_body("token", "is missing"))
}

#[catch(404)]
fn not_found(_req: &Request) -> (Status, Json<Value>) {
    (Status::NotFound, error_body("entity", "not found"))
}

#[catch(422)]
fn unprocessable(_req: &Request) -> (Status, Json<Value>) {
    (Status::UnprocessableEntity, error_body("request", "unprocessable entity"))
}

#[catch(500)]
fn internal_error(_req: &Request) -> (Status, Json<Value>) {
    (Status::InternalServerError, error_body("server", "internal error"))
}

#[catch(default)]
fn fallback(status: Status, _req: &Request) -> (Status, Json<Value>) {
    (status, error_body("request", status.reason_lossy()))
}

/// Routes are declared without a trailing slash; `/api/tags/` is served as `/api/tags`.
fn strip_trailing_slash(request: &mut Request<'_>) {
    let path = request.uri().path().as_str();
    if path.len() <= 1 || !path.ends_with('/') {
        return;
    }
    let mut target = path.trim_end_matches('/').to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = request.uri().query() {
        target.push('?');
        target.push_str(query.as_str());
    }
    if let Ok(uri) = Origin::parse_owned(target) {
        request.set_uri(uri);
    }
}

/// Assembles the application: store, migrations, token service and routes.
pub fn build(config: Config) -> errors::Result<Rocket<Build>> {
    let pool = db::init_pool(&config)?;
    db::run_migrations(&pool)?;
    let tokens = auth::TokenService::from_config(&config)?;

    Ok(rocket::build()
        .manage(pool)
        .manage(tokens)
        .manage(config)
        .attach(AdHoc::on_request("Trailing slash", |request, _| {
            Box::pin(async move { strip_trailing_slash(request) })
        }))
        .mount(
            "/api",
            routes![
                users::register,
                users::login,
                users::current,
                users::update,
                profile::profile,
                profile::follow,
                profile::unfollow,
                article::list,
                article::feed,
                article::create,
                article::get,
                article::update,
                article::delete,
                article::favorite,
                article::unfavorite,
                comment::add,
                comment::list,
                comment::delete,
                tags::list,
            ],
        )
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                not_found,
                unprocessable,
                internal_error,
                fallback
            ],
        ))
}

#[rocket::main]
async fn main() {
    let rocket = match Config::from_env().and_then(build) {
        Ok(rocket) => rocket,
        Err(e) => {
            eprintln!("{}", e.display_chain());
            std::process::exit(1);
        }
    };
    if let Err(e) = rocket.launch().await {
        eprintln!("conduit stopped: {}", e);
        std::process::exit(1);
    }
}
