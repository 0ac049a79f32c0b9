//! Distributor entity - A reseller that owns devices and receives releases.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Distributor database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "distributors")]
pub struct Model {
    /// Unique identifier for the distributor
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Company name
    pub name: String,
    /// Inactive distributors keep their history but are not offered new releases
    pub is_active: bool,
}

/// Defines relationships between Distributor and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One distributor owns many devices
    #[sea_orm(has_many = "super::device::Entity")]
    Devices,
    /// One distributor can be targeted by many releases
    #[sea_orm(has_many = "super::release_distributor_target::Entity")]
    ReleaseTargets,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Devices.def()
    }
}

impl Related<super::release_distributor_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReleaseTargets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
