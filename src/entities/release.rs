//! Release entity - A versioned firmware/software artifact distributed to the fleet.
//!
//! A release carries its artifact reference (public URL, file name, size, checksum and
//! the object key in storage), descriptive text, its targeting mode and its lifecycle
//! status. The `(version, release_type, product_id)` tuple is unique among releases.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Release database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "releases")]
pub struct Model {
    /// Unique identifier for the release
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name (e.g., "Controller firmware spring update")
    pub name: String,
    /// Dotted numeric version (e.g., "2.0.1")
    #[sea_orm(indexed)]
    pub version: String,
    /// Kind of artifact
    pub release_type: ReleaseType,
    /// Product this release applies to, None for product-independent releases
    pub product_id: Option<i64>,
    /// Public URL of the uploaded artifact
    pub file_url: String,
    /// Original file name of the artifact
    pub file_name: String,
    /// Artifact size in bytes
    pub file_size: i64,
    /// Optional checksum supplied by the uploader
    pub checksum: Option<String>,
    /// Object key of the artifact inside the storage bucket
    pub storage_path: String,
    /// Short description
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    /// Operator-facing release notes
    #[sea_orm(column_type = "Text", nullable)]
    pub release_notes: Option<String>,
    /// Technical changelog
    #[sea_orm(column_type = "Text", nullable)]
    pub changelog: Option<String>,
    /// Lowest version a device must run before installing this release
    pub min_previous_version: Option<String>,
    /// Derived from the target tables
    pub target_type: TargetType,
    /// Whether devices are required to install this release
    pub is_mandatory: bool,
    /// Lifecycle status
    #[sea_orm(indexed)]
    pub status: ReleaseStatus,
    /// Nominal release date shown to distributors
    pub release_date: DateTimeUtc,
    /// Set once, when the release is published
    pub published_at: Option<DateTimeUtc>,
    /// Whether targets should be notified when the release is published
    pub notify_on_publish: bool,
    /// Operator who created the release
    pub created_by: String,
    /// When the release row was created
    pub created_at: DateTimeUtc,
    /// When the release row was last modified
    pub updated_at: DateTimeUtc,
}

/// Kind of artifact a release distributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Device firmware image
    #[sea_orm(string_value = "firmware")]
    Firmware,
    /// Application software package
    #[sea_orm(string_value = "software")]
    Software,
    /// Incremental patch
    #[sea_orm(string_value = "patch")]
    Patch,
    /// Urgent fix
    #[sea_orm(string_value = "hotfix")]
    Hotfix,
    /// Hardware driver
    #[sea_orm(string_value = "driver")]
    Driver,
}

impl ReleaseType {
    /// Lowercase name as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Software => "software",
            Self::Patch => "patch",
            Self::Hotfix => "hotfix",
            Self::Driver => "driver",
        }
    }

    /// Whether installing this release moves the device's firmware version
    /// (as opposed to its software version).
    #[must_use]
    pub const fn tracks_firmware(self) -> bool {
        matches!(self, Self::Firmware)
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    /// Editable, invisible to targets, deletable
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Visible to targets
    #[sea_orm(string_value = "published")]
    Published,
    /// Superseded, kept for history
    #[sea_orm(string_value = "deprecated")]
    Deprecated,
    /// Withdrawn; no operation moves a release here yet
    #[sea_orm(string_value = "recalled")]
    Recalled,
}

impl ReleaseStatus {
    /// Lowercase name as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Deprecated => "deprecated",
            Self::Recalled => "recalled",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which target table (if any) scopes a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// Every distributor and device
    #[sea_orm(string_value = "all")]
    All,
    /// Only the distributors in `release_distributor_targets`
    #[sea_orm(string_value = "distributors")]
    Distributors,
    /// Only the devices in `release_device_targets`
    #[sea_orm(string_value = "devices")]
    Devices,
}

impl TargetType {
    /// Lowercase name as stored in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Distributors => "distributors",
            Self::Devices => "devices",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defines relationships between Release and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One release has many distributor targets
    #[sea_orm(has_many = "super::release_distributor_target::Entity")]
    DistributorTargets,
    /// One release has many device targets
    #[sea_orm(has_many = "super::release_device_target::Entity")]
    DeviceTargets,
    /// One release has many download records
    #[sea_orm(has_many = "super::release_download::Entity")]
    Downloads,
    /// One release has many install history records
    #[sea_orm(has_many = "super::device_update_history::Entity")]
    UpdateHistory,
    /// Each release optionally belongs to one product
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::release_distributor_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DistributorTargets.def()
    }
}

impl Related<super::release_device_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeviceTargets.def()
    }
}

impl Related<super::release_download::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Downloads.def()
    }
}

impl Related<super::device_update_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UpdateHistory.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
