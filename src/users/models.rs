use crate::db::schema::{follows, users};
use crate::profile::Profile;
use crate::types::ApiError;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete, insert_into, insert_or_ignore_into, select, update};
use log::error;
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand::rngs::OsRng;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = users, treat_none_as_null = true)]
struct UserChanges<'a> {
    username: &'a str,
    email: &'a str,
    password_hash: &'a str,
    bio: Option<&'a str>,
    image: Option<&'a str>,
}

pub fn hash_password(password: &str, rounds: u32) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params {
        rounds,
        ..Params::default()
    };
    Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("password hashing failed: {}", e);
            ApiError::Internal
        })
}

impl User {
    pub fn create(new_user: &NewUser, connection: &mut SqliteConnection) -> QueryResult<User> {
        insert_into(users::table)
            .values(new_user)
            .get_result::<User>(connection)
    }

    pub fn save(&self, connection: &mut SqliteConnection) -> QueryResult<()> {
        let changes = UserChanges {
            username: &self.username,
            email: &self.email,
            password_hash: &self.password_hash,
            bio: self.bio.as_deref(),
            image: self.image.as_deref(),
        };
        update(self).set(&changes).execute(connection)?;
        Ok(())
    }

    pub fn set_password(&mut self, password: &str, rounds: u32) -> Result<(), ApiError> {
        self.password_hash = hash_password(password, rounds)?;
        Ok(())
    }

    pub fn verify_password(&self, password_to_verify: &str) -> bool {
        match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => Pbkdf2
                .verify_password(password_to_verify.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                error!("stored password hash for user {} is unreadable: {}", self.id, e);
                false
            }
        }
    }

    pub fn profile(&self, following: bool) -> Profile {
        Profile {
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
            following,
        }
    }

    pub fn load_by_id(user_id: i32, connection: &mut SqliteConnection) -> QueryResult<Option<User>> {
        users::table.find(user_id).first::<User>(connection).optional()
    }

    pub fn load_by_name(name: &str, connection: &mut SqliteConnection) -> QueryResult<Option<User>> {
        users::table
            .filter(users::username.eq(name))
            .first::<User>(connection)
            .optional()
    }

    pub fn load_by_email(email: &str, connection: &mut SqliteConnection) -> QueryResult<Option<User>> {
        users::table
            .filter(users::email.eq(email))
            .first::<User>(connection)
            .optional()
    }

    /// Whether another account (not `except`) already uses `email`.
    pub fn email_taken(
        email: &str,
        except: Option<i32>,
        connection: &mut SqliteConnection,
    ) -> QueryResult<bool> {
        let owner = users::table
            .filter(users::email.eq(email))
            .select(users::id)
            .first::<i32>(connection)
            .optional()?;
        Ok(matches!(owner, Some(id) if Some(id) != except))
    }

    pub fn username_taken(
        name: &str,
        except: Option<i32>,
        connection: &mut SqliteConnection,
    ) -> QueryResult<bool> {
        let owner = users::table
            .filter(users::username.eq(name))
            .select(users::id)
            .first::<i32>(connection)
            .optional()?;
        Ok(matches!(owner, Some(id) if Some(id) != except))
    }

    pub fn follow(&self, other: &User, connection: &mut SqliteConnection) -> QueryResult<()> {
        insert_or_ignore_into(follows::table)
            .values((
                follows::follower_id.eq(self.id),
                follows::followed_id.eq(other.id),
            ))
            .execute(connection)?;
        Ok(())
    }

    pub fn unfollow(&self, other: &User, connection: &mut SqliteConnection) -> QueryResult<()> {
        delete(
            follows::table
                .filter(follows::follower_id.eq(self.id))
                .filter(follows::followed_id.eq(other.id)),
        )
        .execute(connection)?;
        Ok(())
    }

    pub fn is_following(&self, other_id: i32, connection: &mut SqliteConnection) -> QueryResult<bool> {
        select(exists(
            follows::table
                .filter(follows::follower_id.eq(self.id))
                .filter(follows::followed_id.eq(other_id)),
        ))
        .get_result::<bool>(connection)
    }

    /// The subset of `candidates` this user follows.
    pub fn following_among(
        &self,
        candidates: &[i32],
        connection: &mut SqliteConnection,
    ) -> QueryResult<HashSet<i32>> {
        let followed = follows::table
            .filter(follows::follower_id.eq(self.id))
            .filter(follows::followed_id.eq_any(candidates))
            .select(follows::followed_id)
            .load::<i32>(connection)?;
        Ok(followed.into_iter().collect())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::db::test_support::TestDb;

    pub fn create_user(name: &str, connection: &mut SqliteConnection) -> User {
        let hash = hash_password("password123", 1_000).unwrap();
        let email = format!("{}@example.com", name);
        User::create(
            &NewUser {
                username: name,
                email: &email,
                password_hash: &hash,
            },
            connection,
        )
        .unwrap()
    }

    #[test]
    fn stored_hash_is_not_the_password() {
        let hash = hash_password("password123", 1_000).unwrap();
        assert_ne!(hash, "password123");
        assert!(hash.starts_with("$pbkdf2-sha256$"));

        let user = User {
            id: 1,
            username: "jake".into(),
            email: "jake@example.com".into(),
            password_hash: hash,
            bio: None,
            image: None,
        };
        assert!(user.verify_password("password123"));
        assert!(!user.verify_password("password124"));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        let user = User {
            id: 1,
            username: "jake".into(),
            email: "jake@example.com".into(),
            password_hash: "password123".into(),
            bio: None,
            image: None,
        };
        assert!(!user.verify_password("password123"));
    }

    #[test]
    fn lookups_report_absence() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let jake = create_user("jake", &mut conn);

        assert_eq!(User::load_by_id(jake.id, &mut conn).unwrap(), Some(jake.clone()));
        assert_eq!(User::load_by_id(jake.id + 100, &mut conn).unwrap(), None);
        assert!(User::load_by_name("nobody", &mut conn).unwrap().is_none());
        assert!(User::load_by_email("jake@example.com", &mut conn).unwrap().is_some());
    }

    #[test]
    fn taken_checks_ignore_the_owner() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let jake = create_user("jake", &mut conn);

        assert!(User::email_taken("jake@example.com", None, &mut conn).unwrap());
        assert!(!User::email_taken("jake@example.com", Some(jake.id), &mut conn).unwrap());
        assert!(User::username_taken("jake", None, &mut conn).unwrap());
        assert!(!User::username_taken("jane", None, &mut conn).unwrap());
    }

    #[test]
    fn save_writes_every_field() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let mut jake = create_user("jake", &mut conn);
        jake.bio = Some("I work at statefarm".into());
        jake.image = Some("https://example.com/jake.png".into());
        jake.save(&mut conn).unwrap();

        let reloaded = User::load_by_id(jake.id, &mut conn).unwrap().unwrap();
        assert_eq!(reloaded, jake);

        jake.bio = None;
        jake.save(&mut conn).unwrap();
        let reloaded = User::load_by_id(jake.id, &mut conn).unwrap().unwrap();
        assert_eq!(reloaded.bio, None);
    }

    #[test]
    fn follow_is_idempotent() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let a = create_user("alice", &mut conn);
        let b = create_user("bobby", &mut conn);
        let c = create_user("carol", &mut conn);

        a.follow(&b, &mut conn).unwrap();
        a.follow(&b, &mut conn).unwrap();
        a.follow(&c, &mut conn).unwrap();
        assert!(a.is_following(b.id, &mut conn).unwrap());
        assert!(!b.is_following(a.id, &mut conn).unwrap());

        let among = a.following_among(&[b.id, c.id, a.id], &mut conn).unwrap();
        assert_eq!(among, [b.id, c.id].iter().cloned().collect::<HashSet<i32>>());

        a.unfollow(&b, &mut conn).unwrap();
        a.unfollow(&b, &mut conn).unwrap();
        assert!(!a.is_following(b.id, &mut conn).unwrap());
    }
}
