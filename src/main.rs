use dotenvy::dotenv;
use fleetdesk::{
    config,
    core::{
        compliance,
        release::{self, ReleaseFilter},
    },
    entities::ReleaseStatus,
    errors::Result,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Storage settings are only needed for uploads and removals
    match config::storage::load_storage_config() {
        Ok(storage) => info!(
            "Object storage: {} (bucket {}, {} byte chunks)",
            storage.base_url(),
            storage.bucket,
            storage.chunk_size
        ),
        Err(e) => warn!("Object storage not configured: {}", e),
    }

    // 4. Connect and make sure the schema exists
    let db = config::database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    config::database::create_tables(&db)
        .await
        .inspect(|()| info!("Database schema ready."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Summarize rollout of every published release
    let published = release::list_releases(
        &db,
        &ReleaseFilter {
            status: Some(ReleaseStatus::Published),
            ..Default::default()
        },
    )
    .await?;
    info!("{} published release(s)", published.len());

    for release in &published {
        let stats = compliance::release_compliance(&db, release.id).await?;
        let outdated = compliance::outdated_devices(&db, release.id).await?;
        info!(
            "{} {} ({}): {} downloads by {} users, {}/{} installed ({}%), {} failed, {} rolled back, {} outdated device(s)",
            release.name,
            release.version,
            release.release_type,
            stats.total_downloads,
            stats.unique_downloads,
            stats.successful_installs,
            stats.target_count,
            stats.install_percentage,
            stats.failed_installs,
            stats.rolled_back_installs,
            outdated.len()
        );
    }

    Ok(())
}
