//! Release store - Creates, reads, lists, edits and deletes release records.
//!
//! A release is created as a draft once its artifact has been uploaded. The
//! `(version, release_type, product_id)` tuple must be unique. Identity fields (name,
//! version, type and file) are frozen once the release leaves `draft`, and only drafts
//! can be deleted. Deleting a draft cascades to its target rows and download log and
//! then removes the artifact from storage on a best-effort basis.

use crate::{
    core::{
        lifecycle::release_state_error,
        targeting::{self, ReleaseTargeting, ReleaseTargets},
        version,
    },
    entities::{
        DeviceUpdateHistory, InstallStatus, Product, Release, ReleaseDeviceTarget,
        ReleaseDistributorTarget, ReleaseDownload, ReleaseStatus, ReleaseType, TargetType,
        device_update_history, release, release_device_target, release_distributor_target,
        release_download,
    },
    errors::{Error, Result},
    storage::{ArtifactUploader, ObjectStorage, UploadProgress, UploadRequest, UploadedArtifact},
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    Condition, ConnectionTrait, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Operator-supplied fields for a new release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    /// Display name
    pub name: String,
    /// Dotted numeric version
    pub version: String,
    /// Kind of artifact
    pub release_type: ReleaseType,
    /// Product scope, None for product-independent releases
    pub product_id: Option<i64>,
    /// Checksum published alongside the artifact
    pub checksum: Option<String>,
    /// Short description
    pub description: Option<String>,
    /// Operator-facing release notes
    pub release_notes: Option<String>,
    /// Technical changelog
    pub changelog: Option<String>,
    /// Lowest version a device must run before installing
    pub min_previous_version: Option<String>,
    /// Whether installation is required
    pub is_mandatory: bool,
    /// Nominal release date, defaults to creation time
    pub release_date: Option<DateTime<Utc>>,
    /// Whether targets should be notified on publish
    pub notify_on_publish: bool,
    /// Operator creating the release
    pub created_by: String,
}

impl NewRelease {
    /// Creates the field set with every optional field left empty.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        release_type: ReleaseType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            release_type,
            product_id: None,
            checksum: None,
            description: None,
            release_notes: None,
            changelog: None,
            min_previous_version: None,
            is_mandatory: false,
            release_date: None,
            notify_on_publish: false,
            created_by: created_by.into(),
        }
    }
}

/// Partial edit of a release. `None` leaves a field untouched; for nullable columns
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseChanges {
    /// New display name (draft only)
    pub name: Option<String>,
    /// New version (draft only)
    pub version: Option<String>,
    /// New release type (draft only)
    pub release_type: Option<ReleaseType>,
    /// New product scope
    pub product_id: Option<Option<i64>>,
    /// Replacement artifact (draft only)
    pub file: Option<UploadedArtifact>,
    /// New checksum
    pub checksum: Option<Option<String>>,
    /// New description
    pub description: Option<Option<String>>,
    /// New release notes
    pub release_notes: Option<Option<String>>,
    /// New changelog
    pub changelog: Option<Option<String>>,
    /// New minimum previous version
    pub min_previous_version: Option<Option<String>>,
    /// New mandatory flag
    pub is_mandatory: Option<bool>,
    /// New release date
    pub release_date: Option<DateTime<Utc>>,
    /// New notification flag
    pub notify_on_publish: Option<bool>,
}

/// Filters for [`list_releases`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFilter {
    /// Only releases in this status
    pub status: Option<ReleaseStatus>,
    /// Only releases of this type
    pub release_type: Option<ReleaseType>,
    /// Only releases scoped to this product
    pub product_id: Option<i64>,
    /// Substring of the name or version
    pub search: Option<String>,
}

/// A release together with its resolved targets and usage counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDetails {
    /// The release row
    pub release: release::Model,
    /// Distributor and device ids the release is targeted at
    pub targets: ReleaseTargets,
    /// Download events recorded for the release
    pub download_count: u64,
    /// Distinct users who downloaded the release
    pub unique_download_count: u64,
    /// Successful installs recorded for the release
    pub successful_install_count: u64,
}

fn validate_new_release(new_release: &NewRelease) -> Result<()> {
    if new_release.name.trim().is_empty() {
        return Err(Error::validation("Release name cannot be empty"));
    }
    if new_release.created_by.trim().is_empty() {
        return Err(Error::validation("Release creator cannot be empty"));
    }
    validate_version(&new_release.version)?;
    if let Some(min) = &new_release.min_previous_version {
        validate_version(min)?;
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    let version = version.trim();
    if version.is_empty() {
        return Err(Error::validation("Version cannot be empty"));
    }
    if !version::is_well_formed(version) {
        return Err(Error::validation(format!(
            "Version {version} must be dot-separated numbers (e.g. 2.0.1)"
        )));
    }
    Ok(())
}

fn validate_artifact(artifact: &UploadedArtifact) -> Result<i64> {
    if artifact.file_name.trim().is_empty() {
        return Err(Error::validation("Artifact file name cannot be empty"));
    }
    if artifact.public_url.trim().is_empty() || artifact.storage_path.trim().is_empty() {
        return Err(Error::validation("Artifact has no storage location"));
    }
    if artifact.file_size == 0 {
        return Err(Error::validation("Artifact cannot be empty"));
    }
    i64::try_from(artifact.file_size)
        .map_err(|_| Error::validation("Artifact is too large to record"))
}

async fn ensure_product_exists<C: ConnectionTrait>(db: &C, product_id: Option<i64>) -> Result<()> {
    if let Some(id) = product_id {
        if Product::find_by_id(id).one(db).await?.is_none() {
            return Err(Error::validation(format!("Product {id} does not exist")));
        }
    }
    Ok(())
}

/// Fails with `DuplicateVersion` if another release already uses this
/// version/type/product combination. `exclude` skips the release being edited.
///
/// # Errors
/// Returns `DuplicateVersion` on a clash, or a database error.
pub async fn ensure_unique_version<C: ConnectionTrait>(
    db: &C,
    version: &str,
    release_type: ReleaseType,
    product_id: Option<i64>,
    exclude: Option<i64>,
) -> Result<()> {
    let mut query = Release::find()
        .filter(release::Column::Version.eq(version))
        .filter(release::Column::ReleaseType.eq(release_type));
    query = match product_id {
        Some(id) => query.filter(release::Column::ProductId.eq(id)),
        None => query.filter(release::Column::ProductId.is_null()),
    };
    if let Some(id) = exclude {
        query = query.filter(release::Column::Id.ne(id));
    }

    if query.one(db).await?.is_some() {
        return Err(Error::DuplicateVersion {
            version: version.to_string(),
            release_type: release_type.to_string(),
        });
    }
    Ok(())
}

async fn insert_release<C: ConnectionTrait>(
    db: &C,
    new_release: NewRelease,
    artifact: &UploadedArtifact,
) -> Result<release::Model> {
    validate_new_release(&new_release)?;
    let file_size = validate_artifact(artifact)?;
    let version = new_release.version.trim().to_string();

    ensure_product_exists(db, new_release.product_id).await?;
    ensure_unique_version(
        db,
        &version,
        new_release.release_type,
        new_release.product_id,
        None,
    )
    .await?;

    let now = Utc::now();
    let release = release::ActiveModel {
        name: Set(new_release.name.trim().to_string()),
        version: Set(version),
        release_type: Set(new_release.release_type),
        product_id: Set(new_release.product_id),
        file_url: Set(artifact.public_url.clone()),
        file_name: Set(artifact.file_name.clone()),
        file_size: Set(file_size),
        checksum: Set(new_release.checksum),
        storage_path: Set(artifact.storage_path.clone()),
        description: Set(new_release.description),
        release_notes: Set(new_release.release_notes),
        changelog: Set(new_release.changelog),
        min_previous_version: Set(new_release
            .min_previous_version
            .map(|v| v.trim().to_string())),
        target_type: Set(TargetType::All),
        is_mandatory: Set(new_release.is_mandatory),
        status: Set(ReleaseStatus::Draft),
        release_date: Set(new_release.release_date.unwrap_or(now)),
        published_at: Set(None),
        notify_on_publish: Set(new_release.notify_on_publish),
        created_by: Set(new_release.created_by.trim().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    release.insert(db).await.map_err(Into::into)
}

/// Records a new draft release for an already uploaded artifact.
///
/// # Errors
/// Returns an error if:
/// - A required field is empty or a version is not dot-separated numbers
/// - The artifact reference is incomplete
/// - The product does not exist
/// - Another release has the same version, type and product (`DuplicateVersion`)
/// - The database insert fails
#[instrument(skip(db, new_release, artifact), fields(version = %new_release.version))]
pub async fn create_release(
    db: &DatabaseConnection,
    new_release: NewRelease,
    artifact: &UploadedArtifact,
) -> Result<release::Model> {
    let txn = db.begin().await?;
    let release = insert_release(&txn, new_release, artifact).await?;
    txn.commit().await?;

    info!(
        "Created draft release {} ({} {})",
        release.id, release.release_type, release.version
    );
    Ok(release)
}

/// Full create flow: validate, upload the artifact, then record the draft and its targets.
///
/// Validation (including the duplicate rule and target existence) runs before any
/// bytes are sent. If the upload fails or is cancelled nothing is written to the
/// database. If recording fails after a successful upload, the artifact is removed
/// again on a best-effort basis.
///
/// # Errors
/// Returns validation errors, `DuplicateVersion`, `Cancelled`, `Transport`, `Io`, or
/// a database error.
#[instrument(skip_all, fields(version = %new_release.version, file = %request.file_name))]
pub async fn create_release_from_upload<S>(
    db: &DatabaseConnection,
    storage: &S,
    request: &UploadRequest,
    new_release: NewRelease,
    targeting: ReleaseTargeting,
    progress: &mut (dyn FnMut(UploadProgress) + Send),
    cancel: &CancellationToken,
) -> Result<ReleaseDetails>
where
    S: ArtifactUploader + ObjectStorage + ?Sized,
{
    validate_new_release(&new_release)?;
    ensure_product_exists(db, new_release.product_id).await?;
    ensure_unique_version(
        db,
        new_release.version.trim(),
        new_release.release_type,
        new_release.product_id,
        None,
    )
    .await?;
    targeting::ensure_targets_exist(db, &targeting).await?;

    let artifact = storage.upload(request, progress, cancel).await?;
    debug!("Artifact stored at {}", artifact.storage_path);

    let recorded = async {
        let txn = db.begin().await?;
        let release = insert_release(&txn, new_release, &artifact).await?;
        targeting::replace_targets(&txn, release.id, &targeting).await?;
        txn.commit().await?;
        Ok::<_, Error>(release)
    }
    .await;

    match recorded {
        Ok(release) => {
            info!(
                "Created draft release {} ({} {}) targeting {}",
                release.id,
                release.release_type,
                release.version,
                targeting.target_type()
            );
            get_release_details(db, release.id).await
        }
        Err(e) => {
            if let Err(cleanup) = storage.remove(&artifact.storage_path).await {
                warn!(
                    "Could not remove orphaned artifact {}: {}",
                    artifact.storage_path, cleanup
                );
            }
            Err(e)
        }
    }
}

/// Retrieves a release by its unique ID.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn get_release(db: &DatabaseConnection, release_id: i64) -> Result<Option<release::Model>> {
    Release::find_by_id(release_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a release with its targets, download counters and successful installs.
///
/// # Errors
/// Returns `ReleaseNotFound` if the release does not exist, or a database error.
pub async fn get_release_details(
    db: &DatabaseConnection,
    release_id: i64,
) -> Result<ReleaseDetails> {
    let release = Release::find_by_id(release_id)
        .one(db)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;

    let targets = targeting::get_targets(db, release_id).await?;

    let download_count = ReleaseDownload::find()
        .filter(release_download::Column::ReleaseId.eq(release_id))
        .count(db)
        .await?;

    let unique_users: Vec<String> = ReleaseDownload::find()
        .select_only()
        .column(release_download::Column::UserId)
        .distinct()
        .filter(release_download::Column::ReleaseId.eq(release_id))
        .into_tuple()
        .all(db)
        .await?;

    let successful_install_count = DeviceUpdateHistory::find()
        .filter(device_update_history::Column::ReleaseId.eq(release_id))
        .filter(device_update_history::Column::Status.eq(InstallStatus::Success))
        .count(db)
        .await?;

    Ok(ReleaseDetails {
        release,
        targets,
        download_count,
        unique_download_count: unique_users.len() as u64,
        successful_install_count,
    })
}

/// Lower-cased `LIKE` pattern matching `term` anywhere, with wildcards escaped.
fn substring_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Lists releases matching `filter`, newest first.
///
/// The search term matches any part of the name or version, case-insensitively.
/// `%` and `_` in the term are matched literally.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn list_releases(
    db: &DatabaseConnection,
    filter: &ReleaseFilter,
) -> Result<Vec<release::Model>> {
    let mut query = Release::find();

    if let Some(status) = filter.status {
        query = query.filter(release::Column::Status.eq(status));
    }
    if let Some(release_type) = filter.release_type {
        query = query.filter(release::Column::ReleaseType.eq(release_type));
    }
    if let Some(product_id) = filter.product_id {
        query = query.filter(release::Column::ProductId.eq(product_id));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = substring_pattern(search);
        query = query.filter(
            Condition::any()
                .add(
                    Expr::expr(Func::lower(Expr::col(release::Column::Name)))
                        .like(LikeExpr::new(pattern.clone()).escape('\\')),
                )
                .add(
                    Expr::expr(Func::lower(Expr::col(release::Column::Version)))
                        .like(LikeExpr::new(pattern).escape('\\')),
                ),
        );
    }

    query
        .order_by_desc(release::Column::CreatedAt)
        .order_by_desc(release::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Applies `changes` to a release.
///
/// Name, version, type and file can only change while the release is a draft. When
/// the version, type or product changes, uniqueness is checked again. A replaced
/// artifact is removed from storage on a best-effort basis after the edit commits.
///
/// # Errors
/// Returns an error if:
/// - The release does not exist (`ReleaseNotFound`)
/// - A frozen field is edited after publishing (`InvalidState`)
/// - A new value fails validation or clashes with another release
/// - The database update fails
#[instrument(skip(db, storage, changes))]
pub async fn update_release<S>(
    db: &DatabaseConnection,
    storage: &S,
    release_id: i64,
    changes: ReleaseChanges,
) -> Result<release::Model>
where
    S: ObjectStorage + ?Sized,
{
    let txn = db.begin().await?;
    let current = Release::find_by_id(release_id)
        .one(&txn)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;

    let touches_identity = changes.name.as_ref().is_some_and(|n| n.trim() != current.name)
        || changes
            .version
            .as_ref()
            .is_some_and(|v| v.trim() != current.version)
        || changes
            .release_type
            .is_some_and(|t| t != current.release_type)
        || changes.file.is_some();
    if touches_identity && current.status != ReleaseStatus::Draft {
        return Err(Error::invalid_state(release_id, current.status, "edit"));
    }

    let version = changes
        .version
        .as_deref()
        .map_or_else(|| current.version.clone(), |v| v.trim().to_string());
    let release_type = changes.release_type.unwrap_or(current.release_type);
    let product_id = changes.product_id.unwrap_or(current.product_id);

    validate_version(&version)?;
    if let Some(Some(min)) = &changes.min_previous_version {
        validate_version(min)?;
    }
    if product_id != current.product_id {
        ensure_product_exists(&txn, product_id).await?;
    }
    if version != current.version
        || release_type != current.release_type
        || product_id != current.product_id
    {
        ensure_unique_version(&txn, &version, release_type, product_id, Some(release_id)).await?;
    }

    let replaced_path = changes
        .file
        .as_ref()
        .map(|_| current.storage_path.clone());
    let mut active: release::ActiveModel = current.into();

    if let Some(name) = changes.name {
        if name.trim().is_empty() {
            return Err(Error::validation("Release name cannot be empty"));
        }
        active.name = Set(name.trim().to_string());
    }
    active.version = Set(version);
    active.release_type = Set(release_type);
    active.product_id = Set(product_id);
    if let Some(file) = &changes.file {
        active.file_size = Set(validate_artifact(file)?);
        active.file_url = Set(file.public_url.clone());
        active.file_name = Set(file.file_name.clone());
        active.storage_path = Set(file.storage_path.clone());
    }
    if let Some(checksum) = changes.checksum {
        active.checksum = Set(checksum);
    }
    if let Some(description) = changes.description {
        active.description = Set(description);
    }
    if let Some(release_notes) = changes.release_notes {
        active.release_notes = Set(release_notes);
    }
    if let Some(changelog) = changes.changelog {
        active.changelog = Set(changelog);
    }
    if let Some(min) = changes.min_previous_version {
        active.min_previous_version = Set(min.map(|v| v.trim().to_string()));
    }
    if let Some(is_mandatory) = changes.is_mandatory {
        active.is_mandatory = Set(is_mandatory);
    }
    if let Some(release_date) = changes.release_date {
        active.release_date = Set(release_date);
    }
    if let Some(notify) = changes.notify_on_publish {
        active.notify_on_publish = Set(notify);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(&txn).await?;
    txn.commit().await?;

    if let Some(old_path) = replaced_path.filter(|old| *old != updated.storage_path) {
        if let Err(e) = storage.remove(&old_path).await {
            warn!("Could not remove replaced artifact {}: {}", old_path, e);
        }
    }

    Ok(updated)
}

/// Deletes a draft release with its target rows and download log, then removes its
/// artifact from storage.
///
/// The row is only removed while its status is still `draft` at write time. Storage
/// removal runs after the database commit; a failure there is logged and ignored,
/// which can leave an orphaned object behind.
///
/// # Errors
/// Returns `ReleaseNotFound`, `InvalidState` for non-draft releases, or a database error.
#[instrument(skip(db, storage))]
pub async fn delete_release<S>(
    db: &DatabaseConnection,
    storage: &S,
    release_id: i64,
) -> Result<release::Model>
where
    S: ObjectStorage + ?Sized,
{
    let txn = db.begin().await?;
    let release = Release::find_by_id(release_id)
        .one(&txn)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })?;

    if release.status != ReleaseStatus::Draft {
        return Err(Error::invalid_state(release_id, release.status, "delete"));
    }

    ReleaseDistributorTarget::delete_many()
        .filter(release_distributor_target::Column::ReleaseId.eq(release_id))
        .exec(&txn)
        .await?;
    ReleaseDeviceTarget::delete_many()
        .filter(release_device_target::Column::ReleaseId.eq(release_id))
        .exec(&txn)
        .await?;
    ReleaseDownload::delete_many()
        .filter(release_download::Column::ReleaseId.eq(release_id))
        .exec(&txn)
        .await?;

    let deleted = Release::delete_many()
        .filter(release::Column::Id.eq(release_id))
        .filter(release::Column::Status.eq(ReleaseStatus::Draft))
        .exec(&txn)
        .await?;
    if deleted.rows_affected == 0 {
        return Err(release_state_error(&txn, release_id, "delete").await?);
    }
    txn.commit().await?;
    info!("Deleted draft release {} ({})", release.id, release.version);

    if let Err(e) = storage.remove(&release.storage_path).await {
        warn!(
            "Release {} deleted but artifact {} could not be removed: {}",
            release.id, release.storage_path, e
        );
    }

    Ok(release)
}
