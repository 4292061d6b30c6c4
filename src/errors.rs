// Errors raised while bootstrapping the service: configuration, pool, migrations.
// Request-level failures are `types::ApiError`.

use diesel::r2d2;
use std::env::VarError;
use std::num::ParseIntError;

error_chain! {
    foreign_links {
        Var(VarError);
        Int(ParseIntError);
        R2D2(r2d2::PoolError);
        Diesel(diesel::result::Error);
    }

    errors {
        Migration(reason: String) {
            description("failed to run database migrations")
            display("failed to run database migrations: {}", reason)
        }
        Config(var: &'static str, reason: String) {
            description("invalid configuration")
            display("invalid configuration for {}: {}", var, reason)
        }
    }
}
