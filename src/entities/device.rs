//! Device entity - A field unit owned by a distributor.
//!
//! Devices are managed elsewhere; this crate only reads them and moves their
//! current firmware/software version when an install is recorded.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Device database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    /// Unique identifier for the device
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Manufacturer serial number
    #[sea_orm(unique)]
    pub serial_number: String,
    /// Human-readable name
    pub name: String,
    /// Distributor that owns the device
    pub distributor_id: Option<i64>,
    /// Product model of the device
    pub product_id: Option<i64>,
    /// Firmware version the device last reported
    pub current_firmware_version: Option<String>,
    /// Software version the device last reported
    pub current_software_version: Option<String>,
    /// When a successful install was last recorded
    pub last_update_date: Option<DateTimeUtc>,
    /// Inactive devices are ignored by compliance reporting
    pub is_active: bool,
}

impl Model {
    /// Version field relevant to a release of the given kind.
    #[must_use]
    pub fn current_version_for(&self, release_type: super::release::ReleaseType) -> Option<&str> {
        if release_type.tracks_firmware() {
            self.current_firmware_version.as_deref()
        } else {
            self.current_software_version.as_deref()
        }
    }
}

/// Defines relationships between Device and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each device belongs to at most one distributor
    #[sea_orm(
        belongs_to = "super::distributor::Entity",
        from = "Column::DistributorId",
        to = "super::distributor::Column::Id"
    )]
    Distributor,
    /// Each device is at most one product model
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    /// One device has many install history records
    #[sea_orm(has_many = "super::device_update_history::Entity")]
    UpdateHistory,
    /// One device can be targeted by many releases
    #[sea_orm(has_many = "super::release_device_target::Entity")]
    ReleaseTargets,
}

impl Related<super::distributor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Distributor.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::device_update_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UpdateHistory.def()
    }
}

impl Related<super::release_device_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReleaseTargets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
