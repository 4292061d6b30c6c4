use crate::db::schema::{article_tags, articles, favorites, follows, tags as tag_rows, users};
use crate::profile::Profile;
use crate::tags;
use crate::users::models::User;
use crate::utils::{rand_string, serialize_date, Page};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::{count_star, exists};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sqlite::Sqlite;
use diesel::{delete, insert_into, insert_or_ignore_into, select, update};
use serde::Serialize;
use slug::slugify;
use std::collections::{HashMap, HashSet};

const SLUG_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = articles)]
pub struct Article {
    pub id: i32,
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
struct NewArticle<'a> {
    author_id: i32,
    slug: &'a str,
    title: &'a str,
    description: &'a str,
    body: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = articles)]
struct ArticleChanges<'a> {
    title: &'a str,
    description: &'a str,
    body: &'a str,
    updated_at: NaiveDateTime,
}

/// Validated article content, ready to be written.
#[derive(Debug, Clone)]
pub struct ArticleDraft {
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Option<Vec<String>>,
}

/// Conjunctive filters for article listings, each matched by name.
#[derive(Debug, Default)]
pub struct ArticleFilter<'a> {
    pub tag: Option<&'a str>,
    pub author: Option<&'a str>,
    pub favorited: Option<&'a str>,
}

/// Listing restrictions, each applied as a subquery so matching ids are
/// never pulled into memory or bound one by one.
#[derive(Debug, Default)]
struct Scope {
    tag: Option<String>,
    author: Option<String>,
    favorited_by: Option<String>,
    followed_by: Option<i32>,
}

impl Scope {
    fn query(&self) -> articles::BoxedQuery<'static, Sqlite> {
        let mut query = articles::table.into_boxed();
        if let Some(tag) = &self.tag {
            let tag_ids = tag_rows::table
                .filter(tag_rows::name.eq(tag.clone()))
                .select(tag_rows::id);
            query = query.filter(
                articles::id.eq_any(
                    article_tags::table
                        .filter(article_tags::tag_id.eq_any(tag_ids))
                        .select(article_tags::article_id),
                ),
            );
        }
        if let Some(name) = &self.favorited_by {
            let user_ids = users::table
                .filter(users::username.eq(name.clone()))
                .select(users::id);
            query = query.filter(
                articles::id.eq_any(
                    favorites::table
                        .filter(favorites::user_id.eq_any(user_ids))
                        .select(favorites::article_id),
                ),
            );
        }
        if let Some(name) = &self.author {
            query = query.filter(
                articles::author_id.eq_any(
                    users::table
                        .filter(users::username.eq(name.clone()))
                        .select(users::id),
                ),
            );
        }
        if let Some(reader_id) = self.followed_by {
            query = query.filter(
                articles::author_id.eq_any(
                    follows::table
                        .filter(follows::follower_id.eq(reader_id))
                        .select(follows::followed_id),
                ),
            );
        }
        query
    }

    /// One page, most recent first, plus the number of matches overall.
    fn load(&self, page: Page, connection: &mut SqliteConnection) -> QueryResult<(Vec<Article>, i64)> {
        let total = self.query().count().get_result::<i64>(connection)?;
        let items = self
            .query()
            .order((articles::created_at.desc(), articles::id.desc()))
            .limit(page.limit)
            .offset(page.offset)
            .load::<Article>(connection)?;
        Ok((items, total))
    }
}

fn slug_taken(slug: &str, connection: &mut SqliteConnection) -> QueryResult<bool> {
    select(exists(articles::table.filter(articles::slug.eq(slug)))).get_result(connection)
}

/// Slugifies `title`, appending a random suffix until nothing else uses it.
pub fn unique_slug(title: &str, connection: &mut SqliteConnection) -> QueryResult<String> {
    let mut base = slugify(title);
    if base.is_empty() {
        base = "article".to_owned();
    }
    let mut candidate = base.clone();
    while slug_taken(&candidate, connection)? {
        candidate = format!("{}-{}", base, rand_string(SLUG_SUFFIX_LEN).to_lowercase());
    }
    Ok(candidate)
}

impl Article {
    pub fn find_by_slug(slug: &str, connection: &mut SqliteConnection) -> QueryResult<Option<Article>> {
        articles::table
            .filter(articles::slug.eq(slug))
            .first::<Article>(connection)
            .optional()
    }

    pub fn create(
        author_id: i32,
        draft: &ArticleDraft,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Article> {
        connection.transaction(|connection| {
            let slug = unique_slug(&draft.title, connection)?;
            let now = Utc::now().naive_utc();
            let article = insert_into(articles::table)
                .values(&NewArticle {
                    author_id,
                    slug: &slug,
                    title: &draft.title,
                    description: &draft.description,
                    body: &draft.body,
                    created_at: now,
                    updated_at: now,
                })
                .get_result::<Article>(connection)?;
            if let Some(tag_list) = &draft.tag_list {
                tags::set_tags(article.id, tag_list, connection)?;
            }
            Ok(article)
        })
    }

    /// Writes `draft` over this article. The slug never changes; tags are
    /// replaced only when the draft carries a list.
    pub fn apply(
        &self,
        draft: &ArticleDraft,
        connection: &mut SqliteConnection,
    ) -> QueryResult<Article> {
        connection.transaction(|connection| {
            let article = update(self)
                .set(&ArticleChanges {
                    title: &draft.title,
                    description: &draft.description,
                    body: &draft.body,
                    updated_at: Utc::now().naive_utc(),
                })
                .get_result::<Article>(connection)?;
            if let Some(tag_list) = &draft.tag_list {
                tags::set_tags(article.id, tag_list, connection)?;
            }
            Ok(article)
        })
    }

    pub fn delete(&self, connection: &mut SqliteConnection) -> QueryResult<()> {
        delete(self).execute(connection)?;
        Ok(())
    }

    pub fn favorite(&self, user_id: i32, connection: &mut SqliteConnection) -> QueryResult<()> {
        insert_or_ignore_into(favorites::table)
            .values((
                favorites::user_id.eq(user_id),
                favorites::article_id.eq(self.id),
            ))
            .execute(connection)?;
        Ok(())
    }

    pub fn unfavorite(&self, user_id: i32, connection: &mut SqliteConnection) -> QueryResult<()> {
        delete(
            favorites::table
                .filter(favorites::user_id.eq(user_id))
                .filter(favorites::article_id.eq(self.id)),
        )
        .execute(connection)?;
        Ok(())
    }

    /// Articles matching every filter in `filter`. A filter naming an unknown
    /// tag or user matches nothing.
    pub fn find_many(
        filter: &ArticleFilter,
        page: Page,
        connection: &mut SqliteConnection,
    ) -> QueryResult<(Vec<Article>, i64)> {
        Scope {
            tag: filter.tag.map(str::to_owned),
            author: filter.author.map(str::to_owned),
            favorited_by: filter.favorited.map(str::to_owned),
            followed_by: None,
        }
        .load(page, connection)
    }

    /// Articles by the authors `reader` follows.
    pub fn feed(
        reader: &User,
        page: Page,
        connection: &mut SqliteConnection,
    ) -> QueryResult<(Vec<Article>, i64)> {
        Scope {
            followed_by: Some(reader.id),
            ..Scope::default()
        }
        .load(page, connection)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_date")]
    pub updated_at: NaiveDateTime,
    pub favorited: bool,
    pub favorites_count: i64,
    pub author: Profile,
}

fn favorites_counts(
    article_ids: &[i32],
    connection: &mut SqliteConnection,
) -> QueryResult<HashMap<i32, i64>> {
    let rows = favorites::table
        .filter(favorites::article_id.eq_any(article_ids))
        .group_by(favorites::article_id)
        .select((favorites::article_id, count_star()))
        .load::<(i32, i64)>(connection)?;
    Ok(rows.into_iter().collect())
}

fn favorited_among(
    user_id: i32,
    article_ids: &[i32],
    connection: &mut SqliteConnection,
) -> QueryResult<HashSet<i32>> {
    let rows = favorites::table
        .filter(favorites::user_id.eq(user_id))
        .filter(favorites::article_id.eq_any(article_ids))
        .select(favorites::article_id)
        .load::<i32>(connection)?;
    Ok(rows.into_iter().collect())
}

/// Decorates `articles` with tags, favorite state and author profiles as
/// seen by `viewer`. Each aggregate is loaded once for the whole list.
pub fn views(
    articles: Vec<Article>,
    viewer: Option<&User>,
    connection: &mut SqliteConnection,
) -> QueryResult<Vec<ArticleView>> {
    if articles.is_empty() {
        return Ok(vec![]);
    }
    let ids: Vec<i32> = articles.iter().map(|a| a.id).collect();
    let author_ids: Vec<i32> = articles.iter().map(|a| a.author_id).collect();

    let authors: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&author_ids))
        .load::<User>(connection)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();
    let mut tag_lists = tags::names_for(&ids, connection)?;
    let counts = favorites_counts(&ids, connection)?;
    let (favorited, following) = match viewer {
        Some(viewer) => (
            favorited_among(viewer.id, &ids, connection)?,
            viewer.following_among(&author_ids, connection)?,
        ),
        None => (HashSet::new(), HashSet::new()),
    };

    articles
        .into_iter()
        .map(|article| {
            let author = authors.get(&article.author_id).ok_or(DieselError::NotFound)?;
            Ok(ArticleView {
                tag_list: tag_lists.remove(&article.id).unwrap_or_default(),
                favorited: favorited.contains(&article.id),
                favorites_count: counts.get(&article.id).cloned().unwrap_or(0),
                author: author.profile(following.contains(&article.author_id)),
                slug: article.slug,
                title: article.title,
                description: article.description,
                body: article.body,
                created_at: article.created_at,
                updated_at: article.updated_at,
            })
        })
        .collect()
}

/// The single-article form of [`views`].
pub fn view(
    article: Article,
    viewer: Option<&User>,
    connection: &mut SqliteConnection,
) -> QueryResult<ArticleView> {
    views(vec![article], viewer, connection)?
        .pop()
        .ok_or(DieselError::NotFound)
}
