pub mod blobstore;
pub mod cad_engine;
pub mod claim;
pub mod config;
pub mod db;
pub mod error;
pub mod logship;
pub mod models;
pub mod ocr_engine;
pub mod processing;
pub mod runtime;
pub mod sanitize;
pub mod schema;
pub mod stage;

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
