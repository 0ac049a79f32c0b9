//! Targeting engine - Decides which distributors or devices a release applies to.
//!
//! A release targets everyone, an explicit set of distributors, or an explicit set of
//! devices. Every targeting write clears both target tables for the release before
//! inserting the new set, so the two sets can never coexist, and `target_type` on the
//! release row is re-derived from whatever was written.

use crate::{
    entities::{
        Device, Distributor, Release, ReleaseDeviceTarget, ReleaseDistributorTarget, TargetType,
        device, distributor, release, release_device_target, release_distributor_target,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{ConnectionTrait, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use sea_orm::sea_query::Expr;
use tracing::{debug, instrument};

/// Which target table a set of ids goes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// `release_distributor_targets`
    Distributors,
    /// `release_device_targets`
    Devices,
}

/// Complete targeting choice for a release
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReleaseTargeting {
    /// Every distributor and device
    #[default]
    All,
    /// Only these distributors (and their devices)
    Distributors(Vec<i64>),
    /// Only these devices
    Devices(Vec<i64>),
}

impl ReleaseTargeting {
    /// Builds the targeting for `ids` of `kind`; an empty list means everyone.
    #[must_use]
    pub fn from_ids(kind: TargetKind, ids: &[i64]) -> Self {
        let ids = dedup_ids(ids);
        if ids.is_empty() {
            return Self::All;
        }
        match kind {
            TargetKind::Distributors => Self::Distributors(ids),
            TargetKind::Devices => Self::Devices(ids),
        }
    }

    /// `target_type` a release gets with this targeting.
    #[must_use]
    pub fn target_type(&self) -> TargetType {
        match self {
            Self::Distributors(ids) if !ids.is_empty() => TargetType::Distributors,
            Self::Devices(ids) if !ids.is_empty() => TargetType::Devices,
            _ => TargetType::All,
        }
    }
}

/// Resolved target sets of a release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseTargets {
    /// Targeted distributors, in assignment order
    pub distributor_ids: Vec<i64>,
    /// Targeted devices, in assignment order
    pub device_ids: Vec<i64>,
}

impl ReleaseTargets {
    /// Number of explicitly targeted entities (0 when the release targets everyone).
    #[must_use]
    pub fn len(&self) -> usize {
        self.distributor_ids.len() + self.device_ids.len()
    }

    /// Whether the release targets everyone.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Checks that every id in `targeting` names an existing distributor or device.
///
/// # Errors
/// Returns `DistributorNotFound` / `DeviceNotFound` for the first unknown id.
pub async fn ensure_targets_exist<C: ConnectionTrait>(
    db: &C,
    targeting: &ReleaseTargeting,
) -> Result<()> {
    match targeting {
        ReleaseTargeting::All => Ok(()),
        ReleaseTargeting::Distributors(ids) => {
            let found: Vec<i64> = Distributor::find()
                .select_only()
                .column(distributor::Column::Id)
                .filter(distributor::Column::Id.is_in(ids.clone()))
                .into_tuple()
                .all(db)
                .await?;
            match ids.iter().find(|id| !found.contains(id)) {
                Some(&id) => Err(Error::DistributorNotFound { id }),
                None => Ok(()),
            }
        }
        ReleaseTargeting::Devices(ids) => {
            let found: Vec<i64> = Device::find()
                .select_only()
                .column(device::Column::Id)
                .filter(device::Column::Id.is_in(ids.clone()))
                .into_tuple()
                .all(db)
                .await?;
            match ids.iter().find(|id| !found.contains(id)) {
                Some(&id) => Err(Error::DeviceNotFound { id }),
                None => Ok(()),
            }
        }
    }
}

/// Clears both target tables for the release, writes the new set and updates
/// `target_type`. Runs on whatever connection or transaction it is given.
pub(crate) async fn replace_targets<C: ConnectionTrait>(
    db: &C,
    release_id: i64,
    targeting: &ReleaseTargeting,
) -> Result<TargetType> {
    if Release::find_by_id(release_id).one(db).await?.is_none() {
        return Err(Error::ReleaseNotFound { id: release_id });
    }
    ensure_targets_exist(db, targeting).await?;

    ReleaseDistributorTarget::delete_many()
        .filter(release_distributor_target::Column::ReleaseId.eq(release_id))
        .exec(db)
        .await?;
    ReleaseDeviceTarget::delete_many()
        .filter(release_device_target::Column::ReleaseId.eq(release_id))
        .exec(db)
        .await?;

    let now = Utc::now();
    match targeting {
        ReleaseTargeting::Distributors(ids) if !ids.is_empty() => {
            let rows = dedup_ids(ids).into_iter().map(|distributor_id| {
                release_distributor_target::ActiveModel {
                    release_id: Set(release_id),
                    distributor_id: Set(distributor_id),
                    created_at: Set(now),
                    ..Default::default()
                }
            });
            ReleaseDistributorTarget::insert_many(rows).exec(db).await?;
        }
        ReleaseTargeting::Devices(ids) if !ids.is_empty() => {
            let rows = dedup_ids(ids)
                .into_iter()
                .map(|device_id| release_device_target::ActiveModel {
                    release_id: Set(release_id),
                    device_id: Set(device_id),
                    created_at: Set(now),
                    ..Default::default()
                });
            ReleaseDeviceTarget::insert_many(rows).exec(db).await?;
        }
        _ => {}
    }

    let target_type = targeting.target_type();
    Release::update_many()
        .col_expr(release::Column::TargetType, Expr::value(target_type))
        .col_expr(release::Column::UpdatedAt, Expr::value(now))
        .filter(release::Column::Id.eq(release_id))
        .exec(db)
        .await?;

    debug!("Release {} now targets {}", release_id, target_type);
    Ok(target_type)
}

/// Replaces the release's targets with `ids` of `kind`.
///
/// Both target tables are cleared first, so switching from distributor targeting to
/// device targeting (or back) never leaves stale rows. An empty `ids` list makes the
/// release target everyone.
///
/// # Errors
/// Returns `ReleaseNotFound`, `DistributorNotFound` / `DeviceNotFound` for unknown
/// ids, or a database error. Nothing is written on error.
#[instrument(skip(db))]
pub async fn set_targets(
    db: &DatabaseConnection,
    release_id: i64,
    kind: TargetKind,
    ids: &[i64],
) -> Result<TargetType> {
    apply_targeting(db, release_id, &ReleaseTargeting::from_ids(kind, ids)).await
}

/// Applies a complete targeting choice to the release in one transaction.
///
/// # Errors
/// Same as [`set_targets`].
pub async fn apply_targeting(
    db: &DatabaseConnection,
    release_id: i64,
    targeting: &ReleaseTargeting,
) -> Result<TargetType> {
    let txn = db.begin().await?;
    let target_type = replace_targets(&txn, release_id, targeting).await?;
    txn.commit().await?;
    Ok(target_type)
}

/// Makes the release target everyone.
///
/// # Errors
/// Returns `ReleaseNotFound` or a database error.
pub async fn clear_targets(db: &DatabaseConnection, release_id: i64) -> Result<TargetType> {
    apply_targeting(db, release_id, &ReleaseTargeting::All).await
}

/// Reads the distributor and device ids a release targets.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn get_targets<C: ConnectionTrait>(db: &C, release_id: i64) -> Result<ReleaseTargets> {
    let distributor_ids: Vec<i64> = ReleaseDistributorTarget::find()
        .select_only()
        .column(release_distributor_target::Column::DistributorId)
        .filter(release_distributor_target::Column::ReleaseId.eq(release_id))
        .order_by_asc(release_distributor_target::Column::Id)
        .into_tuple()
        .all(db)
        .await?;

    let device_ids: Vec<i64> = ReleaseDeviceTarget::find()
        .select_only()
        .column(release_device_target::Column::DeviceId)
        .filter(release_device_target::Column::ReleaseId.eq(release_id))
        .order_by_asc(release_device_target::Column::Id)
        .into_tuple()
        .all(db)
        .await?;

    Ok(ReleaseTargets {
        distributor_ids,
        device_ids,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::release::get_release;
    use crate::test_utils::*;

    #[test]
    fn test_targeting_from_ids() {
        assert_eq!(
            ReleaseTargeting::from_ids(TargetKind::Devices, &[3, 1, 3]),
            ReleaseTargeting::Devices(vec![3, 1])
        );
        assert_eq!(
            ReleaseTargeting::from_ids(TargetKind::Distributors, &[]),
            ReleaseTargeting::All
        );
        assert_eq!(ReleaseTargeting::All.target_type(), TargetType::All);
        assert_eq!(
            ReleaseTargeting::Distributors(vec![]).target_type(),
            TargetType::All
        );
    }

    #[tokio::test]
    async fn test_set_device_targets() -> Result<()> {
        let db = setup_test_db().await?;
        let d1 = create_test_device(&db, "SN-1", None, None).await?;
        let d2 = create_test_device(&db, "SN-2", None, None).await?;
        let release = create_test_release(&db, "2.0.0").await?;

        let target_type = set_targets(&db, release.id, TargetKind::Devices, &[d1.id, d2.id]).await?;
        assert_eq!(target_type, TargetType::Devices);

        let stored = get_release(&db, release.id).await?.unwrap();
        assert_eq!(stored.target_type, TargetType::Devices);

        let targets = get_targets(&db, release.id).await?;
        assert_eq!(targets.device_ids, vec![d1.id, d2.id]);
        assert!(targets.distributor_ids.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_targets_mean_all() -> Result<()> {
        let db = setup_test_db().await?;
        let d1 = create_test_device(&db, "SN-1", None, None).await?;
        let release = create_test_release(&db, "2.0.0").await?;
        set_targets(&db, release.id, TargetKind::Devices, &[d1.id]).await?;

        let target_type = set_targets(&db, release.id, TargetKind::Devices, &[]).await?;
        assert_eq!(target_type, TargetType::All);

        let stored = get_release(&db, release.id).await?.unwrap();
        assert_eq!(stored.target_type, TargetType::All);
        assert!(get_targets(&db, release.id).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_switching_kind_clears_other_table() -> Result<()> {
        let db = setup_test_db().await?;
        let north = create_test_distributor(&db, "North").await?;
        let device = create_test_device(&db, "SN-1", Some(north.id), None).await?;
        let release = create_test_release(&db, "2.0.0").await?;

        set_targets(&db, release.id, TargetKind::Distributors, &[north.id]).await?;
        set_targets(&db, release.id, TargetKind::Devices, &[device.id]).await?;

        let targets = get_targets(&db, release.id).await?;
        assert!(targets.distributor_ids.is_empty());
        assert_eq!(targets.device_ids, vec![device.id]);
        assert_eq!(ReleaseDistributorTarget::find().count(&db).await?, 0);

        set_targets(&db, release.id, TargetKind::Distributors, &[north.id]).await?;
        let targets = get_targets(&db, release.id).await?;
        assert_eq!(targets.distributor_ids, vec![north.id]);
        assert!(targets.device_ids.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_set_targets_rejects_unknown_ids() -> Result<()> {
        let db = setup_test_db().await?;
        let north = create_test_distributor(&db, "North").await?;
        let release = create_test_release(&db, "2.0.0").await?;
        set_targets(&db, release.id, TargetKind::Distributors, &[north.id]).await?;

        let result = set_targets(&db, release.id, TargetKind::Distributors, &[north.id, 99]).await;
        assert!(matches!(result.unwrap_err(), Error::DistributorNotFound { id: 99 }));

        let result = set_targets(&db, release.id, TargetKind::Devices, &[5]).await;
        assert!(matches!(result.unwrap_err(), Error::DeviceNotFound { id: 5 }));

        // Previous targeting survives the failed writes
        let targets = get_targets(&db, release.id).await?;
        assert_eq!(targets.distributor_ids, vec![north.id]);

        Ok(())
    }

    #[tokio::test]
    async fn test_set_targets_unknown_release() -> Result<()> {
        let db = setup_test_db().await?;
        let result = set_targets(&db, 12, TargetKind::Devices, &[]).await;
        assert!(matches!(result.unwrap_err(), Error::ReleaseNotFound { id: 12 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_targets() -> Result<()> {
        let db = setup_test_db().await?;
        let north = create_test_distributor(&db, "North").await?;
        let release = create_test_release(&db, "2.0.0").await?;
        set_targets(&db, release.id, TargetKind::Distributors, &[north.id]).await?;

        assert_eq!(clear_targets(&db, release.id).await?, TargetType::All);
        assert!(get_targets(&db, release.id).await?.is_empty());
        Ok(())
    }
}
