//! Release download entity - append-only log with one row per download event.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Download record database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "release_downloads")]
pub struct Model {
    /// Row identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Downloaded release
    #[sea_orm(indexed)]
    pub release_id: i64,
    /// User who downloaded the artifact
    pub user_id: String,
    /// When the download happened
    pub downloaded_at: DateTimeUtc,
}

/// Defines relationships between downloads and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each download belongs to one release
    #[sea_orm(
        belongs_to = "super::release::Entity",
        from = "Column::ReleaseId",
        to = "super::release::Column::Id"
    )]
    Release,
}

impl Related<super::release::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Release.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
