use crate::article::load_article;
use crate::auth::{CurrentUser, MaybeUser};
use crate::db::schema::{comments, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::types::*;
use crate::users::models::User;
use crate::utils::serialize_date;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into};
use log::info;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

const BODY_MAX: usize = 2048;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub author_id: i32,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
struct NewComment<'a> {
    article_id: i32,
    author_id: i32,
    body: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl Comment {
    pub fn create(
        article_id: i32,
        author_id: i32,
        body: &str,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Comment> {
        let now = Utc::now().naive_utc();
        insert_into(comments::table)
            .values(&NewComment {
                article_id,
                author_id,
                body,
                created_at: now,
                updated_at: now,
            })
            .get_result::<Comment>(connection)
    }

    /// Comments on `article_id` with their authors, oldest first.
    pub fn for_article(
        article_id: i32,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Vec<(Comment, User)>> {
        comments::table
            .inner_join(users::table)
            .filter(comments::article_id.eq(article_id))
            .order((comments::created_at.asc(), comments::id.asc()))
            .load::<(Comment, User)>(connection)
    }

    pub fn find(id: i32, connection: &mut SqliteConnection) -> QueryResult<Option<Comment>> {
        comments::table.find(id).first::<Comment>(connection).optional()
    }

    pub fn delete(&self, connection: &mut SqliteConnection) -> QueryResult<()> {
        diesel_delete(self).execute(connection)?;
        Ok(())
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    id: i32,
    #[serde(serialize_with = "serialize_date")]
    created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    updated_at: NaiveDateTime,
    body: String,
    author: Profile,
}

impl From<(Comment, Profile)> for CommentView {
    fn from((comment, author): (Comment, Profile)) -> Self {
        CommentView {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
            author,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    comment: T,
}

#[derive(Debug, Serialize)]
pub struct CommentsContainer<T> {
    comments: T,
}

impl Validate for CommentContainer<CommentBody> {
    type Draft = String;

    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let body = self.comment.body;
        let mut errors = FieldErrors::default();
        if errors.check_present("body", &body) {
            errors.check_length("body", &body, None, Some(BODY_MAX));
        }
        errors.into_result()?;
        Ok(body)
    }
}

#[post("/articles/<slug>/comments", data = "<details>")]
pub fn add(
    current_user: CurrentUser,
    mut connection: DbConnection,
    slug: &str,
    details: Payload<'_, CommentContainer<CommentBody>>,
) -> Created<CommentContainer<CommentView>> {
    let user = current_user?;
    let body = bind(details)?.validate(&mut connection)?;
    let article = load_article(slug, &mut connection)?;
    let comment = Comment::create(article.id, user.id, &body, &mut connection)?;
    info!("{} commented on {}", user.username, article.slug);

    // Commenters never follow themselves.
    let author = user.profile(false);
    Ok(created(CommentContainer {
        comment: (comment, author).into(),
    }))
}

#[get("/articles/<slug>/comments")]
pub fn list(
    viewer: MaybeUser,
    mut connection: DbConnection,
    slug: &str,
) -> ApiResult<CommentsContainer<Vec<CommentView>>> {
    let viewer = viewer?.0;
    let article = load_article(slug, &mut connection)?;
    let data = Comment::for_article(article.id, &mut connection)?;

    let following = match &viewer {
        Some(viewer) => {
            let authors = data.iter().map(|(_, author)| author.id).collect::<Vec<i32>>();
            viewer.following_among(&authors, &mut connection)?
        }
        None => HashSet::new(),
    };
    let comments = data
        .into_iter()
        .map(|(comment, author)| {
            let profile = author.profile(following.contains(&author.id));
            (comment, profile).into()
        })
        .collect();
    Ok(Json(CommentsContainer { comments }))
}

#[delete("/articles/<slug>/comments/<id>")]
pub fn delete(
    current_user: CurrentUser,
    mut connection: DbConnection,
    slug: &str,
    id: &str,
) -> ApiResult<Value> {
    let user = current_user?;
    let article = load_article(slug, &mut connection)?;
    let missing = || ApiError::not_found("comment", "Invalid id");

    let id = id.parse::<i32>().map_err(|_| missing())?;
    let comment = Comment::find(id, &mut connection)?
        .filter(|comment| comment.article_id == article.id)
        .ok_or_else(missing)?;
    if comment.author_id != user.id {
        return Err(ApiError::forbidden("comment", "only the author may delete"));
    }
    comment.delete(&mut connection)?;
    info!("{} deleted comment {} on {}", user.username, comment.id, article.slug);
    Ok(Json(json!({ "comment": "Delete success" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::models::tests::create_article;
    use crate::db::test_support::TestDb;
    use crate::users::models::tests::create_user;

    fn body_errors(body: &str) -> Option<FieldErrors> {
        let db = TestDb::new();
        let mut conn = db.conn();
        let container = CommentContainer {
            comment: CommentBody { body: body.to_owned() },
        };
        match container.validate(&mut conn) {
            Ok(_) => None,
            Err(ApiError::Validation(errors)) => Some(errors),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn body_rules() {
        assert!(body_errors("Thank you so much!").is_none());
        assert!(body_errors(&"x".repeat(BODY_MAX)).is_none());
        assert!(body_errors("   ").unwrap().get("body").is_some());
        assert_eq!(
            body_errors(&"x".repeat(BODY_MAX + 1)).unwrap().get("body").unwrap(),
            ["is too long (maximum is 2048 characters)".to_string()]
        );
    }

    #[test]
    fn comments_list_in_creation_order() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let jake = create_user("jake", &mut conn);
        let jane = create_user("jane", &mut conn);
        let article = create_article(&jake, "Talk to me", &[], &mut conn);

        let first = Comment::create(article.id, jane.id, "first", &mut conn).unwrap();
        let second = Comment::create(article.id, jake.id, "second", &mut conn).unwrap();

        let listed = Comment::for_article(article.id, &mut conn).unwrap();
        let ids: Vec<i32> = listed.iter().map(|(c, _)| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(listed[0].1.username, "jane");

        first.delete(&mut conn).unwrap();
        assert!(Comment::find(first.id, &mut conn).unwrap().is_none());
        assert_eq!(Comment::for_article(article.id, &mut conn).unwrap().len(), 1);
    }
}
