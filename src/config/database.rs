//! Database configuration module.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs without hand-written SQL. Columns
//! marked `indexed` get their index alongside the table.

use crate::entities::{
    Device, DeviceUpdateHistory, Distributor, Product, Release, ReleaseDeviceTarget,
    ReleaseDistributorTarget, ReleaseDownload, release,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/fleetdesk.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable or returns the
/// default local `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// The returned connection is the backend client every store operation takes
/// explicitly; nothing in the crate holds a global handle.
///
/// # Errors
/// Returns an error if the database cannot be reached or opened.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }
    Ok(())
}

/// Unique `(version, release_type, product_id)` index on releases.
///
/// SQL treats NULLs as distinct, so releases without a product are not covered here;
/// `ensure_unique_version` enforces that case.
fn release_identity_index() -> IndexCreateStatement {
    Index::create()
        .name("idx-releases-version-type-product")
        .table(Release)
        .col(release::Column::Version)
        .col(release::Column::ReleaseType)
        .col(release::Column::ProductId)
        .unique()
        .if_not_exists()
        .to_owned()
}

/// Creates all tables and indexes (if missing) using `SeaORM`'s schema generation from
/// entity definitions.
///
/// Referenced tables are created before the tables that point at them.
///
/// # Errors
/// Returns an error if any `CREATE TABLE` or `CREATE INDEX` statement fails.
pub async fn create_tables<C: ConnectionTrait>(db: &C) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Product).await?;
    create_table(db, &schema, Distributor).await?;
    create_table(db, &schema, Device).await?;
    create_table(db, &schema, Release).await?;
    create_table(db, &schema, ReleaseDistributorTarget).await?;
    create_table(db, &schema, ReleaseDeviceTarget).await?;
    create_table(db, &schema, ReleaseDownload).await?;
    create_table(db, &schema, DeviceUpdateHistory).await?;

    let builder = db.get_database_backend();
    db.execute(builder.build(&release_identity_index())).await?;

    info!("Database tables are in place");
    Ok(())
}
