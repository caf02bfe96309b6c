pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;
pub mod suite;

use std::sync::Arc;

// Export all model types
pub use model::*;

pub use store::{Capabilities, Defects, InMemoryRepository, MetadataCollection, RepositoryError};
pub use suite::{ConformanceReport, ConformanceRunner, HarnessError, RunSettings};

/// Run the conformance suite over two linked in-memory repositories holding the
/// built-in type catalogue: a reference repository and a repository under test
/// configured with `config.capabilities`.
pub async fn run_conformance(config: &crate::config::AppConfig) -> anyhow::Result<ConformanceReport> {
    // Tests may call this repeatedly, so a logger may already be installed
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    config.validate()?;
    let settings = config.run_settings()?;

    let cts = Arc::new(InMemoryRepository::new(
        config.cts.metadata_collection_id.clone(),
        config.cts.metadata_collection_name.clone(),
        seed::type_catalogue(),
    ));
    let tut = Arc::new(
        InMemoryRepository::new(
            config.tut.metadata_collection_id.clone(),
            config.tut.metadata_collection_name.clone(),
            seed::type_catalogue(),
        )
        .with_capabilities(config.capabilities.clone()),
    );
    InMemoryRepository::link_peers(&cts, &tut);
    log::info!(
        "testing {} ({}) against reference {} ({})",
        tut.metadata_collection_name(),
        config.tut.metadata_collection_id,
        cts.metadata_collection_name(),
        config.cts.metadata_collection_id
    );

    let report = ConformanceRunner::new(tut, cts, settings).run().await?;
    Ok(report)
}
