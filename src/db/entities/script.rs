use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scripts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Unique within the merged catalog; dedup is first-seen-wins.
    pub slug: String,
    pub source_repo_id: i32,
    pub name: String,
    pub description: Option<String>,
    /// Json array of category ids.
    pub categories: Json,
    /// Json array of install method objects (variant, script path, resource hints).
    pub install_methods: Json,
    pub updateable: bool,
    pub website: Option<String>,
    pub documentation: Option<String>,
    pub date_created: Option<String>,
    pub interface_port: Option<i32>,
    pub fetched_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::source_repo::Entity",
        from = "Column::SourceRepoId",
        to = "super::source_repo::Column::Id"
    )]
    SourceRepo,
}

impl Related<super::source_repo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceRepo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
