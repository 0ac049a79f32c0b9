//! Compliance calculator.
//!
//! Summarizes how far a release has spread through its target set (downloads,
//! install outcomes, percentage installed) and lists the targeted devices that
//! still run an older version.

use crate::{
    core::{targeting, version},
    entities::{
        Device, DeviceUpdateHistory, InstallStatus, Release, ReleaseDownload, TargetType, device,
        device_update_history, release_download,
    },
    errors::{Error, Result},
};
use sea_orm::{ConnectionTrait, QueryOrder, QuerySelect, prelude::*};
use serde::Serialize;
use std::collections::HashSet;

/// Aggregate adoption numbers for one release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceStats {
    /// Download events
    pub total_downloads: u64,
    /// Distinct downloading users
    pub unique_downloads: u64,
    /// Install attempts of any outcome
    pub total_installs: u64,
    /// Installs that succeeded
    pub successful_installs: u64,
    /// Installs that failed
    pub failed_installs: u64,
    /// Installs that were rolled back
    pub rolled_back_installs: u64,
    /// Size of the explicit target set, 0 when the release targets everyone
    pub target_count: u64,
    /// `round(successful_installs / target_count * 100)`, 0 without explicit targets
    pub install_percentage: u64,
}

/// Share of the target set that installed successfully, rounded to a whole percent.
///
/// Defined as 0 when there is no explicit target set.
#[must_use]
pub fn install_percentage(successful_installs: u64, target_count: u64) -> u64 {
    if target_count == 0 {
        return 0;
    }
    (successful_installs * 100 + target_count / 2) / target_count
}

/// Computes download and install statistics for a release.
///
/// # Errors
/// Returns `ReleaseNotFound` or a database error.
pub async fn release_compliance<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
) -> Result<ComplianceStats> {
    let release = Release::find_by_id(release_id)
        .one(db)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;

    let downloaders: Vec<String> = ReleaseDownload::find()
        .select_only()
        .column(release_download::Column::UserId)
        .filter(release_download::Column::ReleaseId.eq(release_id))
        .into_tuple()
        .all(db)
        .await?;
    let unique_downloads = downloaders.iter().collect::<HashSet<_>>().len() as u64;

    let installs = DeviceUpdateHistory::find()
        .filter(device_update_history::Column::ReleaseId.eq(release_id))
        .all(db)
        .await?;
    let count_status =
        |status: InstallStatus| installs.iter().filter(|h| h.status == status).count() as u64;
    let successful_installs = count_status(InstallStatus::Success);

    let target_count = match release.target_type {
        TargetType::All => 0,
        TargetType::Distributors | TargetType::Devices => {
            targeting::get_targets(db, release_id).await?.len() as u64
        }
    };

    Ok(ComplianceStats {
        total_downloads: downloaders.len() as u64,
        unique_downloads,
        total_installs: installs.len() as u64,
        successful_installs,
        failed_installs: count_status(InstallStatus::Failed),
        rolled_back_installs: count_status(InstallStatus::RolledBack),
        target_count,
        install_percentage: install_percentage(successful_installs, target_count),
    })
}

/// Lists active devices in the release's scope whose relevant version is missing or
/// older than the release.
///
/// The scope is the release's product (when set) narrowed to its explicit target
/// set: devices owned by a targeted distributor, or the targeted devices themselves.
/// Firmware releases compare against the firmware version, every other type against
/// the software version.
///
/// # Errors
/// Returns `ReleaseNotFound` or a database error.
pub async fn outdated_devices<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
) -> Result<Vec<device::Model>> {
    let release = Release::find_by_id(release_id)
        .one(db)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;

    let mut query = Device::find().filter(device::Column::IsActive.eq(true));
    if let Some(product_id) = release.product_id {
        query = query.filter(device::Column::ProductId.eq(product_id));
    }

    match release.target_type {
        TargetType::All => {}
        TargetType::Distributors => {
            let targets = targeting::get_targets(db, release_id).await?;
            query = query.filter(device::Column::DistributorId.is_in(targets.distributor_ids));
        }
        TargetType::Devices => {
            let targets = targeting::get_targets(db, release_id).await?;
            query = query.filter(device::Column::Id.is_in(targets.device_ids));
        }
    }

    let devices = query.order_by_asc(device::Column::Id).all(db).await?;
    Ok(devices
        .into_iter()
        .filter(|d| version::is_outdated(d.current_version_for(release.release_type), &release.version))
        .collect())
}
