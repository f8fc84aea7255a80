use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[sea_orm(string_value = "password")]
    Password,
    #[sea_orm(string_value = "key")]
    Key,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "servers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub auth_type: AuthType,
    /// AES-GCM ciphertext, never serialized to clients.
    #[serde(skip_serializing, default)]
    pub password_enc: Option<String>,
    #[serde(skip_serializing, default)]
    pub private_key_enc: Option<String>,
    #[serde(skip_serializing, default)]
    pub key_passphrase_enc: Option<String>,
    pub color: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::installed_script::Entity")]
    InstalledScript,
}

impl Related<super::installed_script::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InstalledScript.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
