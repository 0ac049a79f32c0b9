//! Lifecycle guard - Moves releases through draft → published → deprecated.
//!
//! Every transition is a single conditional `UPDATE ... WHERE status = <expected>`,
//! so two operators racing on the same release cannot both win. When the write
//! touches no row the release is re-read to report whether it is missing or simply
//! in the wrong state.

use crate::{
    entities::{Release, ReleaseStatus, release},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, prelude::*};
use tracing::{info, instrument};

impl ReleaseStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Only draft → published and published → deprecated exist; nothing enters
    /// `recalled` and nothing returns to `draft`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published) | (Self::Published, Self::Deprecated)
        )
    }

    /// Only drafts may be deleted.
    #[must_use]
    pub const fn is_deletable(self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Name, version, type and file may only change on drafts.
    #[must_use]
    pub const fn allows_identity_edits(self) -> bool {
        matches!(self, Self::Draft)
    }
}

/// Builds the error for a conditional write that matched no row.
pub(crate) async fn release_state_error<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
    action: &str,
) -> Result<Error> {
    Ok(match Release::find_by_id(release_id).one(db).await? {
        Some(release) => Error::invalid_state(release_id, release.status, action),
        None => Error::ReleaseNotFound { id: release_id },
    })
}

async fn transition<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
    from: ReleaseStatus,
    to: ReleaseStatus,
    action: &str,
) -> Result<release::Model> {
    debug_assert!(from.can_transition_to(to));
    let now = Utc::now();

    let mut update = Release::update_many()
        .col_expr(release::Column::Status, Expr::value(to))
        .col_expr(release::Column::UpdatedAt, Expr::value(now));
    if to == ReleaseStatus::Published {
        update = update.col_expr(release::Column::PublishedAt, Expr::value(Some(now)));
    }

    let result = update
        .filter(release::Column::Id.eq(release_id))
        .filter(release::Column::Status.eq(from))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(release_state_error(db, release_id, action).await?);
    }

    Release::find_by_id(release_id)
        .one(db)
        .await?
        .ok_or(Error::ReleaseNotFound { id: release_id })
}

/// Publishes a draft release and stamps `published_at`.
///
/// # Errors
/// Returns `ReleaseNotFound`, `InvalidState` if the release is not a draft at write
/// time (status is left unchanged), or a database error.
#[instrument(skip(db))]
pub async fn publish_release<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
) -> Result<release::Model> {
    let release = transition(
        db,
        release_id,
        ReleaseStatus::Draft,
        ReleaseStatus::Published,
        "publish",
    )
    .await?;

    info!(
        "Published release {} ({} {}), notify_on_publish={}",
        release.id, release.release_type, release.version, release.notify_on_publish
    );
    Ok(release)
}

/// Deprecates a published release.
///
/// # Errors
/// Returns `ReleaseNotFound`, `InvalidState` if the release is not published at write
/// time, or a database error.
#[instrument(skip(db))]
pub async fn deprecate_release<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
) -> Result<release::Model> {
    let release = transition(
        db,
        release_id,
        ReleaseStatus::Published,
        ReleaseStatus::Deprecated,
        "deprecate",
    )
    .await?;

    info!("Deprecated release {} ({})", release.id, release.version);
    Ok(release)
}
