use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, QueryOrder, Set,
};

use crate::db::entities::server::{self, AuthType};

/// Credential fields arrive here already encrypted; the web layer owns
/// plaintext handling so nothing below it ever sees a secret.
pub struct ServerRecord {
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub auth_type: AuthType,
    pub password_enc: Option<String>,
    pub private_key_enc: Option<String>,
    pub key_passphrase_enc: Option<String>,
    pub color: Option<String>,
}

pub async fn create_server(
    db: &DatabaseConnection,
    record: ServerRecord,
) -> Result<server::Model, DbErr> {
    let now = Utc::now();
    server::ActiveModel {
        name: Set(record.name),
        host: Set(record.host),
        port: Set(record.port),
        username: Set(record.username),
        auth_type: Set(record.auth_type),
        password_enc: Set(record.password_enc),
        private_key_enc: Set(record.private_key_enc),
        key_passphrase_enc: Set(record.key_passphrase_enc),
        color: Set(record.color),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn get_server(
    db: &DatabaseConnection,
    id: i32,
) -> Result<Option<server::Model>, DbErr> {
    server::Entity::find_by_id(id).one(db).await
}

pub async fn list_servers(db: &DatabaseConnection) -> Result<Vec<server::Model>, DbErr> {
    server::Entity::find()
        .order_by_asc(server::Column::Name)
        .all(db)
        .await
}

/// Updates a server in place. `None` credential fields keep the stored
/// ciphertext so editing a server does not require re-entering secrets.
pub async fn update_server(
    db: &DatabaseConnection,
    existing: server::Model,
    record: ServerRecord,
) -> Result<server::Model, DbErr> {
    let mut active = existing.into_active_model();
    active.name = Set(record.name);
    active.host = Set(record.host);
    active.port = Set(record.port);
    active.username = Set(record.username);
    active.auth_type = Set(record.auth_type);
    if record.password_enc.is_some() {
        active.password_enc = Set(record.password_enc);
    }
    if record.private_key_enc.is_some() {
        active.private_key_enc = Set(record.private_key_enc);
    }
    if record.key_passphrase_enc.is_some() {
        active.key_passphrase_enc = Set(record.key_passphrase_enc);
    }
    active.color = Set(record.color);
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn delete_server(db: &DatabaseConnection, id: i32) -> Result<u64, DbErr> {
    let res = server::Entity::delete_by_id(id).exec(db).await?;
    Ok(res.rows_affected)
}

pub async fn count_servers(db: &DatabaseConnection) -> Result<u64, DbErr> {
    use sea_orm::PaginatorTrait;
    server::Entity::find().count(db).await
}
