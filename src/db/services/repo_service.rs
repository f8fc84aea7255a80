use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};

use crate::db::entities::source_repo;

pub const DEFAULT_REPO_NAME: &str = "community-scripts";
pub const DEFAULT_OWNER_REPO: &str = "community-scripts/ProxmoxVE";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_JSON_PATH: &str = "frontend/public/json";

pub struct RepoInput {
    pub name: String,
    pub owner_repo: String,
    pub branch: String,
    pub json_path: String,
    pub enabled: bool,
    pub auto_download: bool,
}

/// Inserts the default community-scripts repository on first run.
pub async fn seed_default_repo(db: &DatabaseConnection) -> Result<(), DbErr> {
    let existing = source_repo::Entity::find()
        .filter(source_repo::Column::IsDefault.eq(true))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }
    let now = Utc::now();
    source_repo::ActiveModel {
        name: Set(DEFAULT_REPO_NAME.to_owned()),
        owner_repo: Set(DEFAULT_OWNER_REPO.to_owned()),
        branch: Set(DEFAULT_BRANCH.to_owned()),
        json_path: Set(DEFAULT_JSON_PATH.to_owned()),
        enabled: Set(true),
        auto_download: Set(false),
        is_default: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn list_repos(db: &DatabaseConnection) -> Result<Vec<source_repo::Model>, DbErr> {
    // Default repo first, then creation order, so merge precedence is stable.
    source_repo::Entity::find()
        .order_by_desc(source_repo::Column::IsDefault)
        .order_by_asc(source_repo::Column::Id)
        .all(db)
        .await
}

pub async fn list_enabled_repos(
    db: &DatabaseConnection,
) -> Result<Vec<source_repo::Model>, DbErr> {
    source_repo::Entity::find()
        .filter(source_repo::Column::Enabled.eq(true))
        .order_by_desc(source_repo::Column::IsDefault)
        .order_by_asc(source_repo::Column::Id)
        .all(db)
        .await
}

pub async fn get_repo(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<source_repo::Model>, DbErr> {
    source_repo::Entity::find_by_id(id).one(db).await
}

pub async fn create_repo(
    db: &DatabaseConnection,
    input: RepoInput,
) -> Result<source_repo::Model, DbErr> {
    let now = Utc::now();
    source_repo::ActiveModel {
        name: Set(input.name),
        owner_repo: Set(input.owner_repo),
        branch: Set(input.branch),
        json_path: Set(input.json_path),
        enabled: Set(input.enabled),
        auto_download: Set(input.auto_download),
        is_default: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn update_repo(
    db: &DatabaseConnection,
    existing: source_repo::Model,
    input: RepoInput,
) -> Result<source_repo::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.name = Set(input.name);
    active.owner_repo = Set(input.owner_repo);
    active.branch = Set(input.branch);
    active.json_path = Set(input.json_path);
    active.enabled = Set(input.enabled);
    active.auto_download = Set(input.auto_download);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn delete_repo(db: &DatabaseConnection, id: i32) -> Result<u64, DbErr> {
    let res = source_repo::Entity::delete_by_id(id).exec(db).await?;
    Ok(res.rows_affected)
}
