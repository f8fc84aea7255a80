use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};

use crate::db::entities::installed_script::{self, InstallStatus};

pub async fn create_installed(
    db: &DatabaseConnection,
    script_slug: &str,
    server_id: Option<i32>,
    container_id: Option<i32>,
    status: InstallStatus,
) -> Result<installed_script::Model, DbErr> {
    let now = Utc::now();
    installed_script::ActiveModel {
        script_slug: Set(script_slug.to_owned()),
        server_id: Set(server_id),
        container_id: Set(container_id),
        status: Set(status),
        output_log: Set(String::new()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn get_installed(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<installed_script::Model>, DbErr> {
    installed_script::Entity::find_by_id(id).one(db).await
}

pub async fn list_installed(
    db: &DatabaseConnection,
) -> Result<Vec<installed_script::Model>, DbErr> {
    installed_script::Entity::find()
        .order_by_desc(installed_script::Column::UpdatedAt)
        .all(db)
        .await
}

/// Records the terminal outcome of an install run.
pub async fn finalize_install(
    db: &DatabaseConnection,
    id: i32,
    status: InstallStatus,
    output_log: String,
    container_id: Option<i32>,
    web_ui_url: Option<String>,
) -> Result<installed_script::Model, DbErr> {
    let existing = installed_script::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("installed_script {id} not found")))?;
    let mut active = existing.into_active_model();
    active.status = Set(status);
    active.output_log = Set(output_log);
    if container_id.is_some() {
        active.container_id = Set(container_id);
    }
    if web_ui_url.is_some() {
        active.web_ui_url = Set(web_ui_url);
    }
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

/// Partial update. The outer `None` keeps the stored value; an inner
/// `None` clears the field back to null, so a stale container id or
/// web address can be removed.
pub struct InstalledUpdate {
    pub container_id: Option<Option<i32>>,
    pub status: Option<InstallStatus>,
    pub web_ui_url: Option<Option<String>>,
}

pub async fn update_installed(
    db: &DatabaseConnection,
    existing: installed_script::Model,
    update: InstalledUpdate,
) -> Result<installed_script::Model, DbErr> {
    let mut active = existing.into_active_model();
    if let Some(container_id) = update.container_id {
        active.container_id = Set(container_id);
    }
    if let Some(status) = update.status {
        active.status = Set(status);
    }
    if let Some(web_ui_url) = update.web_ui_url {
        active.web_ui_url = Set(web_ui_url);
    }
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn delete_installed(db: &DatabaseConnection, id: i32) -> Result<u64, DbErr> {
    let res = installed_script::Entity::delete_by_id(id).exec(db).await?;
    Ok(res.rows_affected)
}

/// Best-effort back-fill from auto-detection. Keyed on
/// (server_id, container_id): an existing record is refreshed, a new
/// one is created as a successful install. Records for containers that
/// were not seen are deliberately left alone.
pub async fn upsert_detected(
    db: &DatabaseConnection,
    server_id: i32,
    container_id: i32,
    script_slug: &str,
    web_ui_url: Option<String>,
) -> Result<installed_script::Model, DbErr> {
    let existing = installed_script::Entity::find()
        .filter(installed_script::Column::ServerId.eq(server_id))
        .filter(installed_script::Column::ContainerId.eq(container_id))
        .one(db)
        .await?;

    match existing {
        Some(model) => {
            let mut active = model.into_active_model();
            active.script_slug = Set(script_slug.to_owned());
            if web_ui_url.is_some() {
                active.web_ui_url = Set(web_ui_url);
            }
            active.updated_at = Set(Utc::now());
            active.update(db).await
        }
        None => {
            let now = Utc::now();
            installed_script::ActiveModel {
                script_slug: Set(script_slug.to_owned()),
                server_id: Set(Some(server_id)),
                container_id: Set(Some(container_id)),
                status: Set(InstallStatus::Success),
                web_ui_url: Set(web_ui_url),
                output_log: Set("detected by container scan".to_owned()),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await
        }
    }
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

    #[tokio::test]
    async fn upsert_creates_then_refreshes_by_container_identity() {
        let db = test_db().await;

        let created = upsert_detected(&db, 1, 101, "homarr", Some("10.0.0.5:7575".into()))
            .await
            .unwrap();
        assert_eq!(created.status, InstallStatus::Success);
        assert_eq!(created.container_id, Some(101));

        // Same (server, container) pair: refreshed in place, not duplicated.
        let refreshed = upsert_detected(&db, 1, 101, "homarr", Some("10.0.0.9:7575".into()))
            .await
            .unwrap();
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.web_ui_url.as_deref(), Some("10.0.0.9:7575"));
        assert_eq!(list_installed(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detection_does_not_touch_records_for_unseen_containers() {
        let db = test_db().await;

        let manual = create_installed(&db, "jellyfin", Some(1), Some(200), InstallStatus::Success)
            .await
            .unwrap();
        // A scan that saw a different container leaves the other record alone.
        upsert_detected(&db, 1, 101, "homarr", None).await.unwrap();

        let unchanged = get_installed(&db, manual.id).await.unwrap().unwrap();
        assert_eq!(unchanged.script_slug, "jellyfin");
        assert_eq!(unchanged.updated_at, manual.updated_at);
        assert_eq!(list_installed(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn same_container_id_on_another_server_is_a_distinct_record() {
        let db = test_db().await;
        upsert_detected(&db, 1, 101, "homarr", None).await.unwrap();
        upsert_detected(&db, 2, 101, "homarr", None).await.unwrap();
        assert_eq!(list_installed(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_keeps_untouched_fields_and_clears_on_request() {
        let db = test_db().await;
        let record = create_installed(&db, "homarr", Some(1), Some(101), InstallStatus::Success)
            .await
            .unwrap();
        let record = update_installed(
            &db,
            record,
            InstalledUpdate {
                container_id: None,
                status: None,
                web_ui_url: Some(Some("10.0.0.5:7575".to_owned())),
            },
        )
        .await
        .unwrap();
        assert_eq!(record.container_id, Some(101));
        assert_eq!(record.web_ui_url.as_deref(), Some("10.0.0.5:7575"));

        // A stale container identity can be cleared back to null.
        let cleared = update_installed(
            &db,
            record,
            InstalledUpdate {
                container_id: Some(None),
                status: None,
                web_ui_url: Some(None),
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared.container_id, None);
        assert_eq!(cleared.web_ui_url, None);
        assert_eq!(cleared.status, InstallStatus::Success);
    }

    #[tokio::test]
    async fn finalize_records_status_and_log() {
        let db = test_db().await;
        let record = create_installed(&db, "paperless", None, None, InstallStatus::InProgress)
            .await
            .unwrap();
        let done = finalize_install(
            &db,
            record.id,
            InstallStatus::Failed,
            "line one\nline two\n".to_owned(),
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(done.status, InstallStatus::Failed);
        assert!(done.output_log.contains("line two"));
    }
}
