use chrono::Duration;
use dotenv::dotenv;
use crate::errors::*;
use std::env;

const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PASSWORD_ROUNDS: u32 = 10_000;

/// Process configuration. HTTP listener settings are left to Rocket's own
/// `ROCKET_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    pub token_ttl: Duration,
    pub pool_size: u32,
    pub password_rounds: u32,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL").chain_err(|| "DATABASE_URL must be set")?;
        let secret_key = env::var("SECRET_KEY").chain_err(|| "SECRET_KEY must be set")?;
        if secret_key.is_empty() {
            return Err(ErrorKind::Config("SECRET_KEY", "must not be empty".into()).into());
        }

        let ttl_hours = optional_var("TOKEN_TTL_HOURS")?.unwrap_or(DEFAULT_TOKEN_TTL_HOURS);
        if ttl_hours <= 0 {
            return Err(ErrorKind::Config("TOKEN_TTL_HOURS", "must be positive".into()).into());
        }

        Ok(Config {
            database_url,
            secret_key,
            token_ttl: Duration::hours(ttl_hours),
            pool_size: optional_var("DATABASE_POOL_SIZE")?.unwrap_or(DEFAULT_POOL_SIZE),
            password_rounds: optional_var("PASSWORD_ROUNDS")?.unwrap_or(DEFAULT_PASSWORD_ROUNDS),
        })
    }
}

fn optional_var<T>(name: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match env::var(name) {
        Ok(value) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .chain_err(|| ErrorKind::Config(name, format!("not a number: {}", value)))?;
            Ok(Some(parsed))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_var_parses_and_defaults() {
        env::set_var("CONDUIT_TEST_ROUNDS", " 42 ");
        let rounds: Option<u32> = optional_var("CONDUIT_TEST_ROUNDS").unwrap();
        assert_eq!(rounds, Some(42));

        env::remove_var("CONDUIT_TEST_ROUNDS_MISSING");
        let missing: Option<u32> = optional_var("CONDUIT_TEST_ROUNDS_MISSING").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn optional_var_rejects_garbage() {
        env::set_var("CONDUIT_TEST_POOL", "ten");
        let result: Result<Option<u32>> = optional_var("CONDUIT_TEST_POOL");
        assert!(result.is_err());
    }
}
