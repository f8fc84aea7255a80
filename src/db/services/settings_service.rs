use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, Set};

use crate::db::entities::setting;

// Known setting keys. Values are free-form JSON; these constants keep
// the spelling in one place.
pub const KEY_GITHUB_TOKEN: &str = "github_token";
pub const KEY_SAVE_FILTERS: &str = "save_filters";
pub const KEY_COLOR_CODING: &str = "color_coding";
pub const KEY_AUTO_SYNC_ENABLED: &str = "auto_sync_enabled";
pub const KEY_AUTO_SYNC_SCHEDULE: &str = "auto_sync_schedule";
pub const KEY_AUTH_ENABLED: &str = "auth_enabled";
pub const KEY_AUTH_PASSWORD_HASH: &str = "auth_password_hash";

/// Retrieves a setting by its key.
pub async fn get_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<setting::Model>, DbErr> {
    setting::Entity::find_by_id(key.to_owned()).one(db).await
}

/// Creates or updates a setting. The write path must round-trip: the
/// stored value is returned unchanged by `get_setting`.
pub async fn update_setting(
    db: &DatabaseConnection,
    key: &str,
    value: &serde_json::Value,
) -> Result<setting::Model, DbErr> {
    let now = Utc::now();
    match setting::Entity::find_by_id(key.to_owned()).one(db).await? {
        Some(existing) => {
            let mut active = existing.into_active_model();
            active.value = Set(value.clone());
            active.updated_at = Set(now);
            active.update(db).await
        }
        None => {
            setting::ActiveModel {
                key: Set(key.to_owned()),
                value: Set(value.clone()),
                updated_at: Set(now),
            }
            .insert(db)
            .await
        }
    }
}

pub async fn get_all_settings(db: &DatabaseConnection) -> Result<Vec<setting::Model>, DbErr> {
    setting::Entity::find().all(db).await
}

pub async fn delete_setting(db: &DatabaseConnection, key: &str) -> Result<(), DbErr> {
    setting::Entity::delete_by_id(key.to_owned()).exec(db).await?;
    Ok(())
}

/// Boolean convenience accessor with a default for missing keys.
pub async fn get_bool_setting(
    db: &DatabaseConnection,
    key: &str,
    default: bool,
) -> Result<bool, DbErr> {
    Ok(get_setting(db, key)
        .await?
        .and_then(|s| s.value.as_bool())
        .unwrap_or(default))
}

/// String convenience accessor; empty strings are treated as unset.
pub async fn get_string_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<String>, DbErr> {
    Ok(get_setting(db, key)
        .await?
        .and_then(|s| s.value.as_str().map(|v| v.to_owned()))
        .filter(|v| !v.is_empty()))
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
    async fn settings_round_trip_preserves_values() {
        let db = test_db().await;

        let values = [
            (KEY_SAVE_FILTERS, serde_json::json!(true)),
            (KEY_AUTO_SYNC_SCHEDULE, serde_json::json!("0 0 3 * * *")),
            (
                KEY_COLOR_CODING,
                serde_json::json!({ "production": "#ff0000", "lab": "#00ff00" }),
            ),
        ];
        for (key, value) in &values {
            update_setting(&db, key, value).await.unwrap();
        }
        for (key, value) in &values {
            let stored = get_setting(&db, key).await.unwrap().unwrap();
            assert_eq!(&stored.value, value);
        }
    }

    #[tokio::test]
    async fn update_overwrites_existing_value() {
        let db = test_db().await;
        update_setting(&db, KEY_AUTO_SYNC_ENABLED, &serde_json::json!(false))
            .await
            .unwrap();
        update_setting(&db, KEY_AUTO_SYNC_ENABLED, &serde_json::json!(true))
            .await
            .unwrap();
        assert!(get_bool_setting(&db, KEY_AUTO_SYNC_ENABLED, false).await.unwrap());
    }

    #[tokio::test]
    async fn missing_and_empty_values_read_as_unset() {
        let db = test_db().await;
        assert_eq!(get_string_setting(&db, KEY_GITHUB_TOKEN).await.unwrap(), None);
        update_setting(&db, KEY_GITHUB_TOKEN, &serde_json::json!(""))
            .await
            .unwrap();
        assert_eq!(get_string_setting(&db, KEY_GITHUB_TOKEN).await.unwrap(), None);
        assert!(!get_bool_setting(&db, KEY_AUTO_SYNC_ENABLED, false).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let db = test_db().await;
        update_setting(&db, KEY_SAVE_FILTERS, &serde_json::json!(true))
            .await
            .unwrap();
        delete_setting(&db, KEY_SAVE_FILTERS).await.unwrap();
        assert!(get_setting(&db, KEY_SAVE_FILTERS).await.unwrap().is_none());
    }
}
