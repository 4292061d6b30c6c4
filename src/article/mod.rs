use crate::auth::{CurrentUser, MaybeUser};
use crate::db::DbConnection;
use crate::types::*;
use crate::utils::Page;
use diesel::SqliteConnection;
use log::info;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub mod models;

use self::models::{Article, ArticleDraft, ArticleFilter, ArticleView};

const TITLE_MIN: usize = 4;
const TEXT_MAX: usize = 2048;

#[derive(Debug, Serialize)]
pub struct ArticleResponse {
    article: ArticleView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesResponse {
    articles: Vec<ArticleView>,
    articles_count: i64,
}

fn check_article(draft: &ArticleDraft, errors: &mut FieldErrors) {
    if errors.check_present("title", &draft.title) {
        errors.check_length("title", &draft.title, Some(TITLE_MIN), None);
    }
    if errors.check_present("description", &draft.description) {
        errors.check_length("description", &draft.description, None, Some(TEXT_MAX));
    }
    if errors.check_present("body", &draft.body) {
        errors.check_length("body", &draft.body, None, Some(TEXT_MAX));
    }
}

pub(crate) fn load_article(slug: &str, connection: &mut SqliteConnection) -> Result<Article, ApiError> {
    Article::find_by_slug(slug, connection)?.ok_or_else(|| ApiError::not_found("article", "Invalid slug"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDetails {
    title: String,
    description: String,
    body: String,
    tag_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    article: ArticleDetails,
}

impl Validate for CreateArticle {
    type Draft = ArticleDraft;

    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let details = self.article;
        let draft = ArticleDraft {
            title: details.title,
            description: details.description,
            body: details.body,
            tag_list: details.tag_list,
        };
        let mut errors = FieldErrors::default();
        check_article(&draft, &mut errors);
        errors.into_result()?;
        Ok(draft)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDetails {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    tag_list: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    article: UpdateDetails,
}

/// An update filled in from the stored article before it is checked.
struct ArticleEdit<'a> {
    stored: &'a Article,
    update: UpdateDetails,
}

impl Validate for ArticleEdit<'_> {
    type Draft = ArticleDraft;

    fn validate(self, _connection: &mut SqliteConnection) -> Result<Self::Draft, ApiError> {
        let ArticleEdit { stored, update } = self;
        let draft = ArticleDraft {
            title: update.title.unwrap_or_else(|| stored.title.clone()),
            description: update.description.unwrap_or_else(|| stored.description.clone()),
            body: update.body.unwrap_or_else(|| stored.body.clone()),
            tag_list: update.tag_list,
        };
        let mut errors = FieldErrors::default();
        check_article(&draft, &mut errors);
        errors.into_result()?;
        Ok(draft)
    }
}

#[get("/articles?<tag>&<author>&<favorited>&<limit>&<offset>")]
pub fn list(
    viewer: MaybeUser,
    mut connection: DbConnection,
    tag: Option<&str>,
    author: Option<&str>,
    favorited: Option<&str>,
    limit: Option<&str>,
    offset: Option<&str>,
) -> ApiResult<ArticlesResponse> {
    let viewer = viewer?.0;
    let filter = ArticleFilter {
        tag,
        author,
        favorited,
    };
    let (articles, articles_count) =
        Article::find_many(&filter, Page::parse(limit, offset), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles: models::views(articles, viewer.as_ref(), &mut connection)?,
        articles_count,
    }))
}

#[get("/articles/feed?<limit>&<offset>")]
pub fn feed(
    current_user: CurrentUser,
    mut connection: DbConnection,
    limit: Option<&str>,
    offset: Option<&str>,
) -> ApiResult<ArticlesResponse> {
    let reader = current_user?;
    let (articles, articles_count) =
        Article::feed(&reader, Page::parse(limit, offset), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles: models::views(articles, Some(&reader), &mut connection)?,
        articles_count,
    }))
}

#[post("/articles", data = "<create>")]
pub fn create(
    current_user: CurrentUser,
    mut connection: DbConnection,
    create: Payload<'_, CreateArticle>,
) -> Created<ArticleResponse> {
    let author = current_user?;
    let draft = bind(create)?.validate(&mut connection)?;
    let article = Article::create(author.id, &draft, &mut connection)?;
    info!("{} created article {}", author.username, article.slug);

    Ok(created(ArticleResponse {
        article: models::view(article, Some(&author), &mut connection)?,
    }))
}

#[get("/articles/<slug>")]
pub fn get(viewer: MaybeUser, mut connection: DbConnection, slug: &str) -> ApiResult<ArticleResponse> {
    let viewer = viewer?.0;
    let article = load_article(slug, &mut connection)?;
    Ok(Json(ArticleResponse {
        article: models::view(article, viewer.as_ref(), &mut connection)?,
    }))
}

#[put("/articles/<slug>", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    slug: &str,
    update: Payload<'_, UpdateArticle>,
) -> ApiResult<ArticleResponse> {
    let editor = current_user?;
    let update = bind(update)?;
    let stored = load_article(slug, &mut connection)?;
    if stored.author_id != editor.id {
        return Err(ApiError::forbidden("article", "only the author may edit"));
    }

    let draft = ArticleEdit {
        stored: &stored,
        update: update.article,
    }
    .validate(&mut connection)?;
    let article = stored.apply(&draft, &mut connection)?;
    info!("{} updated article {}", editor.username, article.slug);

    Ok(Json(ArticleResponse {
        article: models::view(article, Some(&editor), &mut connection)?,
    }))
}

#[delete("/articles/<slug>")]
pub fn delete(current_user: CurrentUser, mut connection: DbConnection, slug: &str) -> ApiResult<Value> {
    let author = current_user?;
    let article = load_article(slug, &mut connection)?;
    // Someone else's article is reported as missing.
    if article.author_id != author.id {
        return Err(ApiError::not_found("article", "Invalid slug"));
    }
    article.delete(&mut connection)?;
    info!("{} deleted article {}", author.username, article.slug);
    Ok(Json(json!({ "article": "Delete success" })))
}

#[post("/articles/<slug>/favorite")]
pub fn favorite(current_user: CurrentUser, mut connection: DbConnection, slug: &str) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = load_article(slug, &mut connection)?;
    article.favorite(user.id, &mut connection)?;

    Ok(Json(ArticleResponse {
        article: models::view(article, Some(&user), &mut connection)?,
    }))
}

#[delete("/articles/<slug>/favorite")]
pub fn unfavorite(current_user: CurrentUser, mut connection: DbConnection, slug: &str) -> ApiResult<ArticleResponse> {
    let user = current_user?;
    let article = load_article(slug, &mut connection)?;
    article.unfavorite(user.id, &mut connection)?;

    Ok(Json(ArticleResponse {
        article: models::view(article, Some(&user), &mut connection)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::models::tests::create_article;
    use crate::db::test_support::TestDb;
    use crate::users::models::tests::create_user;

    fn draft(title: &str, description: &str, body: &str) -> ArticleDraft {
        ArticleDraft {
            title: title.to_owned(),
            description: description.to_owned(),
            body: body.to_owned(),
            tag_list: None,
        }
    }

    fn errors_for(draft: &ArticleDraft) -> FieldErrors {
        let mut errors = FieldErrors::default();
        check_article(draft, &mut errors);
        errors
    }

    #[test]
    fn article_rules() {
        assert!(errors_for(&draft("Test Article", "about", "text")).empty());

        let errors = errors_for(&draft("Bad", "about", "text"));
        assert_eq!(
            errors.get("title").unwrap(),
            ["is too short (minimum is 4 characters)".to_string()]
        );

        let errors = errors_for(&draft("Test Article", " ", &"x".repeat(2049)));
        assert_eq!(errors.get("description").unwrap(), ["can't be blank".to_string()]);
        assert_eq!(
            errors.get("body").unwrap(),
            ["is too long (maximum is 2048 characters)".to_string()]
        );
    }

    #[test]
    fn edits_fall_back_to_stored_fields() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let jake = create_user("jake", &mut conn);
        let stored = create_article(&jake, "Stored title", &["kept"], &mut conn);

        let edit = ArticleEdit {
            stored: &stored,
            update: UpdateDetails {
                title: None,
                description: Some("New description".into()),
                body: None,
                tag_list: None,
            },
        };
        let draft = edit.validate(&mut conn).unwrap();
        assert_eq!(draft.title, "Stored title");
        assert_eq!(draft.description, "New description");
        assert_eq!(draft.body, stored.body);
        assert!(draft.tag_list.is_none());

        let edit = ArticleEdit {
            stored: &stored,
            update: UpdateDetails {
                title: Some("Bad".into()),
                description: None,
                body: None,
                tag_list: None,
            },
        };
        match edit.validate(&mut conn) {
            Err(ApiError::Validation(errors)) => assert!(errors.get("title").is_some()),
            other => panic!("expected a validation failure, got {:?}", other),
        }
    }
}
