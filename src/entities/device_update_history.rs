//! Device update history entity - append-only record of install attempts.
//!
//! Each row captures the version a device moved to, the version it came from,
//! who performed the install and how it ended.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Install history database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "device_update_history")]
pub struct Model {
    /// Row identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Device that was updated
    #[sea_orm(indexed)]
    pub device_id: i64,
    /// Release that was installed
    #[sea_orm(indexed)]
    pub release_id: i64,
    /// Version the install moved to
    pub version_installed: String,
    /// Version the device reported before the install
    pub previous_version: Option<String>,
    /// When the install happened
    pub installed_at: DateTimeUtc,
    /// Operator or system that performed the install
    pub installed_by: String,
    /// Outcome of the install
    pub status: InstallStatus,
    /// Free-form operator notes
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
}

/// Outcome of an install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// Install completed
    #[sea_orm(string_value = "success")]
    Success,
    /// Install did not complete
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Install completed and was reverted
    #[sea_orm(string_value = "rolled_back")]
    RolledBack,
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        })
    }
}

/// Defines relationships between history rows and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each history row belongs to one device
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id"
    )]
    Device,
    /// Each history row references one release
    #[sea_orm(
        belongs_to = "super::release::Entity",
        from = "Column::ReleaseId",
        to = "super::release::Column::Id"
    )]
    Release,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl Related<super::release::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Release.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
