use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};

use crate::db::entities::{category, script};

pub struct NewCategory {
    pub id: i32,
    pub name: String,
    pub sort_order: i32,
}

pub struct NewScript {
    pub slug: String,
    pub source_repo_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub categories: serde_json::Value,
    pub install_methods: serde_json::Value,
    pub updateable: bool,
    pub website: Option<String>,
    pub documentation: Option<String>,
    pub date_created: Option<String>,
    pub interface_port: Option<i32>,
}

/// Replaces the whole catalog in one transaction. A failed sync cycle
/// therefore never leaves a half-applied descriptor set behind.
pub async fn replace_catalog(
    db: &DatabaseConnection,
    categories: Vec<NewCategory>,
    scripts: Vec<NewScript>,
) -> Result<(), DbErr> {
    let now = Utc::now();
    let txn = db.begin().await?;

    category::Entity::delete_many().exec(&txn).await?;
    script::Entity::delete_many().exec(&txn).await?;

    if !categories.is_empty() {
        let models = categories.into_iter().map(|c| category::ActiveModel {
            id: Set(c.id),
            name: Set(c.name),
            sort_order: Set(c.sort_order),
        });
        category::Entity::insert_many(models).exec(&txn).await?;
    }

    if !scripts.is_empty() {
        let models = scripts.into_iter().map(|s| script::ActiveModel {
            slug: Set(s.slug),
            source_repo_id: Set(s.source_repo_id),
            name: Set(s.name),
            description: Set(s.description),
            categories: Set(s.categories),
            install_methods: Set(s.install_methods),
            updateable: Set(s.updateable),
            website: Set(s.website),
            documentation: Set(s.documentation),
            date_created: Set(s.date_created),
            interface_port: Set(s.interface_port),
            fetched_at: Set(now),
            ..Default::default()
        });
        script::Entity::insert_many(models).exec(&txn).await?;
    }

    txn.commit().await
}

pub async fn list_scripts(db: &DatabaseConnection) -> Result<Vec<script::Model>, DbErr> {
    script::Entity::find()
        .order_by_asc(script::Column::Name)
        .all(db)
        .await
}

pub async fn get_script_by_slug(
    db: &DatabaseConnection,
    slug: &str,
) -> Result<Option<script::Model>, DbErr> {
    script::Entity::find()
        .filter(script::Column::Slug.eq(slug))
        .one(db)
        .await
}

pub async fn count_scripts(db: &DatabaseConnection) -> Result<u64, DbErr> {
    script::Entity::find().count(db).await
}

pub async fn list_categories(db: &DatabaseConnection) -> Result<Vec<category::Model>, DbErr> {
    category::Entity::find()
        .order_by_asc(category::Column::SortOrder)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use sea_orm::Database;

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        schema::init_schema(&db).await.unwrap();
        db
    }

    fn new_script(slug: &str, name: &str) -> NewScript {
        NewScript {
            slug: slug.to_owned(),
            source_repo_id: 1,
            name: name.to_owned(),
            description: None,
            categories: serde_json::json!([1]),
            install_methods: serde_json::json!([
                { "type": "default", "script": format!("ct/{slug}.sh") }
            ]),
            updateable: false,
            website: None,
            documentation: None,
            date_created: None,
            interface_port: Some(7575),
        }
    }

    fn sample_catalog() -> (Vec<NewCategory>, Vec<NewScript>) {
        let categories = vec![
            NewCategory { id: 1, name: "Dashboards".to_owned(), sort_order: 2 },
            NewCategory { id: 2, name: "Media".to_owned(), sort_order: 1 },
        ];
        let scripts = vec![new_script("homarr", "Homarr"), new_script("jellyfin", "Jellyfin")];
        (categories, scripts)
    }

    #[tokio::test]
    async fn replace_is_idempotent_for_the_same_input() {
        let db = test_db().await;

        let (categories, scripts) = sample_catalog();
        replace_catalog(&db, categories, scripts).await.unwrap();
        let first = list_scripts(&db).await.unwrap();

        let (categories, scripts) = sample_catalog();
        replace_catalog(&db, categories, scripts).await.unwrap();
        let second = list_scripts(&db).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let slugs: Vec<_> = second.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["homarr", "jellyfin"]);
        assert_eq!(count_scripts(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replace_drops_scripts_that_disappeared_upstream() {
        let db = test_db().await;

        let (categories, scripts) = sample_catalog();
        replace_catalog(&db, categories, scripts).await.unwrap();

        replace_catalog(&db, Vec::new(), vec![new_script("homarr", "Homarr")])
            .await
            .unwrap();
        assert!(get_script_by_slug(&db, "jellyfin").await.unwrap().is_none());
        assert!(get_script_by_slug(&db, "homarr").await.unwrap().is_some());
        assert!(list_categories(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn categories_come_back_in_sort_order() {
        let db = test_db().await;
        let (categories, scripts) = sample_catalog();
        replace_catalog(&db, categories, scripts).await.unwrap();

        let listed = list_categories(&db).await.unwrap();
        let names: Vec<_> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Media", "Dashboards"]);
    }
}
