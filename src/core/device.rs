//! Device-facing operations - install history, download log and release visibility.
//!
//! Recording an install is the only operation in this crate that writes to a device:
//! a successful install moves the device's firmware or software version to the
//! release version and stamps `last_update_date`.

use crate::{
    entities::{
        Device, DeviceUpdateHistory, Distributor, InstallStatus, Release, ReleaseDeviceTarget,
        ReleaseDistributorTarget, ReleaseDownload, ReleaseStatus, TargetType, device,
        device_update_history, release, release_device_target, release_distributor_target,
        release_download,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Condition, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// An install outcome to record against a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkDeviceUpdated {
    /// Device that was updated
    pub device_id: i64,
    /// Release that was installed
    pub release_id: i64,
    /// Operator or system performing the install
    pub installed_by: String,
    /// How the install ended
    pub status: InstallStatus,
    /// Free-form notes
    pub notes: Option<String>,
}

impl MarkDeviceUpdated {
    /// A successful install without notes.
    #[must_use]
    pub fn success(device_id: i64, release_id: i64, installed_by: impl Into<String>) -> Self {
        Self {
            device_id,
            release_id,
            installed_by: installed_by.into(),
            status: InstallStatus::Success,
            notes: None,
        }
    }
}

/// Appends an install record and, on success, moves the device to the release version.
///
/// The previous version recorded is the device's current firmware version for
/// firmware releases and its software version for every other type. Failed and
/// rolled-back installs are logged without touching the device.
///
/// # Errors
/// Returns an error if:
/// - The device or release does not exist
/// - The release is still a draft (`InvalidState`)
/// - `installed_by` is empty
/// - The database write fails
#[instrument(skip(db, update), fields(device_id = update.device_id, release_id = update.release_id))]
pub async fn mark_device_updated(
    db: &DatabaseConnection,
    update: MarkDeviceUpdated,
) -> Result<device_update_history::Model> {
    if update.installed_by.trim().is_empty() {
        return Err(Error::validation("Installer cannot be empty"));
    }

    let txn = db.begin().await?;

    let device = Device::find_by_id(update.device_id)
        .one(&txn)
        .await?
        .ok_or(Error::DeviceNotFound {
            id: update.device_id,
        })?;
    let release = Release::find_by_id(update.release_id)
        .one(&txn)
        .await?
        .ok_or(Error::ReleaseNotFound {
            id: update.release_id,
        })?;

    if release.status == ReleaseStatus::Draft {
        return Err(Error::invalid_state(release.id, release.status, "install"));
    }

    let now = Utc::now();
    let previous_version = device
        .current_version_for(release.release_type)
        .map(ToString::to_string);

    let history = device_update_history::ActiveModel {
        device_id: Set(device.id),
        release_id: Set(release.id),
        version_installed: Set(release.version.clone()),
        previous_version: Set(previous_version),
        installed_at: Set(now),
        installed_by: Set(update.installed_by.trim().to_string()),
        status: Set(update.status),
        notes: Set(update.notes),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if update.status == InstallStatus::Success {
        let mut active: device::ActiveModel = device.into();
        if release.release_type.tracks_firmware() {
            active.current_firmware_version = Set(Some(release.version.clone()));
        } else {
            active.current_software_version = Set(Some(release.version.clone()));
        }
        active.last_update_date = Set(Some(now));
        active.update(&txn).await?;
    }

    txn.commit().await?;
    info!(
        "Recorded {} install of {} {} on device {}",
        history.status, release.release_type, release.version, history.device_id
    );
    Ok(history)
}

/// Install history of a device, newest first.
///
/// # Errors
/// Returns `DeviceNotFound` or a database error.
pub async fn device_update_history(
    db: &DatabaseConnection,
    device_id: i64,
) -> Result<Vec<device_update_history::Model>> {
    if Device::find_by_id(device_id).one(db).await?.is_none() {
        return Err(Error::DeviceNotFound { id: device_id });
    }

    DeviceUpdateHistory::find()
        .filter(device_update_history::Column::DeviceId.eq(device_id))
        .order_by_desc(device_update_history::Column::InstalledAt)
        .order_by_desc(device_update_history::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Appends a download event for a published or deprecated release.
///
/// # Errors
/// Returns `ReleaseNotFound`, `InvalidState` for drafts and recalled releases, a
/// validation error for an empty user id, or a database error.
pub async fn record_download(
    db: &DatabaseConnection,
    release_id: i64,
    user_id: &str,
) -> Result<release_download::Model> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("Downloading user cannot be empty"));
    }

    let release = Release::find_by_id(release_id)
        .one(db)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;
    if !matches!(
        release.status,
        ReleaseStatus::Published | ReleaseStatus::Deprecated
    ) {
        return Err(Error::invalid_state(release_id, release.status, "download"));
    }

    release_download::ActiveModel {
        release_id: Set(release_id),
        user_id: Set(user_id.trim().to_string()),
        downloaded_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Published releases visible to a device, newest first.
///
/// A device sees releases that target everyone (product-scoped releases only when
/// they match the device's product), releases that target it directly, and releases
/// that target its owning distributor.
///
/// # Errors
/// Returns `DeviceNotFound` or a database error.
pub async fn releases_for_device(
    db: &DatabaseConnection,
    device_id: i64,
) -> Result<Vec<release::Model>> {
    let device = Device::find_by_id(device_id)
        .one(db)
        .await?
        .ok_or(Error::DeviceNotFound { id: device_id })?;

    let direct: Vec<i64> = ReleaseDeviceTarget::find()
        .select_only()
        .column(release_device_target::Column::ReleaseId)
        .filter(release_device_target::Column::DeviceId.eq(device_id))
        .into_tuple()
        .all(db)
        .await?;

    let via_distributor: Vec<i64> = match device.distributor_id {
        Some(distributor_id) => {
            ReleaseDistributorTarget::find()
                .select_only()
                .column(release_distributor_target::Column::ReleaseId)
                .filter(release_distributor_target::Column::DistributorId.eq(distributor_id))
                .into_tuple()
                .all(db)
                .await?
        }
        None => Vec::new(),
    };

    let product_scope = match device.product_id {
        Some(product_id) => Condition::any()
            .add(release::Column::ProductId.is_null())
            .add(release::Column::ProductId.eq(product_id)),
        None => Condition::all(),
    };

    let visible = Condition::any()
        .add(
            Condition::all()
                .add(release::Column::TargetType.eq(TargetType::All))
                .add(product_scope),
        )
        .add(
            Condition::all()
                .add(release::Column::TargetType.eq(TargetType::Devices))
                .add(release::Column::Id.is_in(direct)),
        )
        .add(
            Condition::all()
                .add(release::Column::TargetType.eq(TargetType::Distributors))
                .add(release::Column::Id.is_in(via_distributor)),
        );

    Release::find()
        .filter(release::Column::Status.eq(ReleaseStatus::Published))
        .filter(visible)
        .order_by_desc(release::Column::PublishedAt)
        .order_by_desc(release::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Published releases visible to a distributor, newest first: those targeting
/// everyone and those targeting the distributor explicitly.
///
/// # Errors
/// Returns `DistributorNotFound` or a database error.
pub async fn releases_for_distributor(
    db: &DatabaseConnection,
    distributor_id: i64,
) -> Result<Vec<release::Model>> {
    if Distributor::find_by_id(distributor_id).one(db).await?.is_none() {
        return Err(Error::DistributorNotFound { id: distributor_id });
    }

    let targeted: Vec<i64> = ReleaseDistributorTarget::find()
        .select_only()
        .column(release_distributor_target::Column::ReleaseId)
        .filter(release_distributor_target::Column::DistributorId.eq(distributor_id))
        .into_tuple()
        .all(db)
        .await?;

    Release::find()
        .filter(release::Column::Status.eq(ReleaseStatus::Published))
        .filter(
            Condition::any()
                .add(release::Column::TargetType.eq(TargetType::All))
                .add(
                    Condition::all()
                        .add(release::Column::TargetType.eq(TargetType::Distributors))
                        .add(release::Column::Id.is_in(targeted)),
                ),
        )
        .order_by_desc(release::Column::PublishedAt)
        .order_by_desc(release::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Download events of a release, newest first.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn release_downloads(
    db: &DatabaseConnection,
    release_id: i64,
) -> Result<Vec<release_download::Model>> {
    ReleaseDownload::find()
        .filter(release_download::Column::ReleaseId.eq(release_id))
        .order_by_desc(release_download::Column::DownloadedAt)
        .order_by_desc(release_download::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
