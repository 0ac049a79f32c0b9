//! Release distributor target - join row granting a distributor access to a release.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Distributor target database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "release_distributor_targets")]
pub struct Model {
    /// Row identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Targeted release
    #[sea_orm(indexed)]
    pub release_id: i64,
    /// Distributor allowed to see the release
    pub distributor_id: i64,
    /// When the target was assigned
    pub created_at: DateTimeUtc,
}

/// Defines relationships between distributor targets and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each target row belongs to one release
    #[sea_orm(
        belongs_to = "super::release::Entity",
        from = "Column::ReleaseId",
        to = "super::release::Column::Id"
    )]
    Release,
    /// Each target row names one distributor
    #[sea_orm(
        belongs_to = "super::distributor::Entity",
        from = "Column::DistributorId",
        to = "super::distributor::Column::Id"
    )]
    Distributor,
}

impl Related<super::release::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Release.def()
    }
}

impl Related<super::distributor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Distributor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
