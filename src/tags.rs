use crate::db::schema::{article_tags, tags};
use crate::db::DbConnection;
use crate::types::ApiResult;
use diesel::prelude::*;
use diesel::{delete, insert_into, insert_or_ignore_into};
use rocket::serde::json::Json;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = tags)]
pub struct Tag {
    pub id: i32,
    pub name: String,
}

impl Tag {
    pub fn find_or_create(name: &str, connection: &mut SqliteConnection) -> QueryResult<Tag> {
        insert_or_ignore_into(tags::table)
            .values(tags::name.eq(name))
            .execute(connection)?;
        tags::table
            .filter(tags::name.eq(name))
            .first::<Tag>(connection)
    }

    pub fn all_names(connection: &mut SqliteConnection) -> QueryResult<Vec<String>> {
        tags::table
            .select(tags::name)
            .order(tags::name.asc())
            .load::<String>(connection)
    }
}

/// Trims, drops blanks and collapses repeats while keeping first-seen order.
fn normalize(names: &[String]) -> Vec<&str> {
    let mut seen = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Replaces the tag set of `article_id` with `names`, in the order given.
pub fn set_tags(
    article_id: i32,
    names: &[String],
    connection: &mut SqliteConnection,
) -> QueryResult<()> {
    connection.transaction(|connection| {
        delete(article_tags::table.filter(article_tags::article_id.eq(article_id)))
            .execute(connection)?;
        for (position, name) in normalize(names).into_iter().enumerate() {
            let tag = Tag::find_or_create(name, connection)?;
            insert_into(article_tags::table)
                .values((
                    article_tags::article_id.eq(article_id),
                    article_tags::tag_id.eq(tag.id),
                    article_tags::position.eq(position as i32),
                ))
                .execute(connection)?;
        }
        Ok(())
    })
}

/// Tag names per article, each list in the order the tags were set.
pub fn names_for(
    article_ids: &[i32],
    connection: &mut SqliteConnection,
) -> QueryResult<HashMap<i32, Vec<String>>> {
    let rows = article_tags::table
        .inner_join(tags::table)
        .filter(article_tags::article_id.eq_any(article_ids))
        .order((article_tags::article_id, article_tags::position))
        .select((article_tags::article_id, tags::name))
        .load::<(i32, String)>(connection)?;

    let mut by_article: HashMap<i32, Vec<String>> = HashMap::new();
    for (article_id, name) in rows {
        by_article.entry(article_id).or_default().push(name);
    }
    Ok(by_article)
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    tags: Vec<String>,
}

#[get("/tags")]
pub fn list(mut connection: DbConnection) -> ApiResult<TagsResponse> {
    Ok(Json(TagsResponse {
        tags: Tag::all_names(&mut connection)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::models::tests::create_article;
    use crate::db::test_support::TestDb;
    use crate::users::models::tests::create_user;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_collapses_repeats() {
        let input = names(&[" rust ", "", "dragons", "rust", "  "]);
        assert_eq!(normalize(&input), vec!["rust", "dragons"]);
    }

    #[test]
    fn retagging_reuses_existing_tags() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let author = create_user("jake", &mut conn);
        let article = create_article(&author, "How to train your dragon", &[], &mut conn);

        set_tags(article.id, &names(&["a", "b"]), &mut conn).unwrap();
        set_tags(article.id, &names(&["a", "b", "c"]), &mut conn).unwrap();

        assert_eq!(Tag::all_names(&mut conn).unwrap(), names(&["a", "b", "c"]));
        let tagged = names_for(&[article.id], &mut conn).unwrap();
        assert_eq!(tagged[&article.id], names(&["a", "b", "c"]));
    }

    #[test]
    fn tags_keep_client_order() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let author = create_user("jake", &mut conn);
        let article = create_article(&author, "Ordering matters", &[], &mut conn);

        set_tags(article.id, &names(&["zeta", "alpha", "zeta", "mid"]), &mut conn).unwrap();
        let tagged = names_for(&[article.id], &mut conn).unwrap();
        assert_eq!(tagged[&article.id], names(&["zeta", "alpha", "mid"]));
    }

    #[test]
    fn empty_list_clears_tags() {
        let db = TestDb::new();
        let mut conn = db.conn();
        let author = create_user("jake", &mut conn);
        let article = create_article(&author, "Soon untagged", &["x", "y"], &mut conn);

        set_tags(article.id, &[], &mut conn).unwrap();
        assert!(names_for(&[article.id], &mut conn).unwrap().is_empty());
        // The tags themselves stay known.
        assert_eq!(Tag::all_names(&mut conn).unwrap(), names(&["x", "y"]));
    }
}
