//! Shared test utilities for `FleetDesk`.
//!
//! This module provides helpers for setting up test databases, creating test
//! entities with sensible defaults and an in-memory artifact store.

use crate::{
    core::release::{self, NewRelease},
    entities::{self, ReleaseType, device, distributor, product},
    errors::{Error, Result},
    storage::{
        ArtifactUploader, ObjectStorage, UploadProgress, UploadRequest, UploadedArtifact,
        object_path,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static ARTIFACT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a product catalogue row.
pub async fn create_test_product(db: &DatabaseConnection, name: &str) -> Result<product::Model> {
    product::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active distributor.
pub async fn create_test_distributor(
    db: &DatabaseConnection,
    name: &str,
) -> Result<distributor::Model> {
    distributor::ActiveModel {
        name: Set(name.to_string()),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates an active device with no product and no software version.
///
/// # Arguments
/// * `serial` - Serial number, also used as the device name
/// * `distributor_id` - Owning distributor, if any
/// * `firmware` - Current firmware version, if known
pub async fn create_test_device(
    db: &DatabaseConnection,
    serial: &str,
    distributor_id: Option<i64>,
    firmware: Option<&str>,
) -> Result<device::Model> {
    device::ActiveModel {
        serial_number: Set(serial.to_string()),
        name: Set(format!("Device {serial}")),
        distributor_id: Set(distributor_id),
        product_id: Set(None),
        current_firmware_version: Set(firmware.map(ToString::to_string)),
        current_software_version: Set(None),
        last_update_date: Set(None),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Assigns a device to a product.
pub async fn set_device_product(
    db: &DatabaseConnection,
    device_id: i64,
    product_id: i64,
) -> Result<device::Model> {
    let device = entities::Device::find_by_id(device_id)
        .one(db)
        .await?
        .ok_or(Error::DeviceNotFound { id: device_id })?;
    let mut active: device::ActiveModel = device.into();
    active.product_id = Set(Some(product_id));
    active.update(db).await.map_err(Into::into)
}

/// An uploaded artifact with a unique storage path.
pub fn test_artifact(file_name: &str) -> UploadedArtifact {
    let n = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let storage_path = format!("releases/{n}-{file_name}");
    UploadedArtifact {
        public_url: format!("https://files.test/{storage_path}"),
        file_name: file_name.to_string(),
        storage_path,
        file_size: 1024,
    }
}

/// A firmware release draft created by "admin".
pub fn test_new_release(name: &str, version: &str) -> NewRelease {
    NewRelease::new(name, version, ReleaseType::Firmware, "admin")
}

/// Creates a draft firmware release named after its version.
pub async fn create_test_release(
    db: &DatabaseConnection,
    version: &str,
) -> Result<entities::release::Model> {
    release::create_release(
        db,
        test_new_release(&format!("Firmware {version}"), version),
        &test_artifact(&format!("fw-{version}.bin")),
    )
    .await
}

/// In-memory artifact store. Uploads never read the file on disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashSet<String>>,
    fail_uploads: bool,
    fail_removals: bool,
}

impl MemoryStorage {
    /// A store whose `remove` always fails.
    pub fn failing_removals() -> Self {
        Self {
            fail_removals: true,
            ..Self::default()
        }
    }

    /// A store whose `upload` always fails with a transport error.
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    /// Registers an object as already stored.
    pub fn insert(&self, path: &str) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
    }

    /// Whether an object is stored at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ArtifactUploader for MemoryStorage {
    async fn upload(
        &self,
        request: &UploadRequest,
        progress: &mut (dyn FnMut(UploadProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<UploadedArtifact> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.fail_uploads {
            return Err(Error::Transport {
                message: "connection reset".to_string(),
            });
        }

        let n = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let storage_path = format!("{}-{n}", object_path(&request.file_name, Utc::now()));
        let file_size = 2048;
        progress(UploadProgress {
            bytes_uploaded: file_size,
            bytes_total: file_size,
            elapsed: Duration::from_millis(5),
        });

        self.insert(&storage_path);
        Ok(UploadedArtifact {
            public_url: format!("memory://{storage_path}"),
            file_name: request.file_name.clone(),
            storage_path,
            file_size,
        })
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn remove(&self, path: &str) -> Result<()> {
        if self.fail_removals {
            return Err(Error::Storage {
                message: format!("cannot remove {path}"),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}
