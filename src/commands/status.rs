use super::runtime;
use crate::constants::layout;
use crate::error::Result;
use crate::models::{AppConfig, SourceMode};
use crate::services::{CorrelationCache, MetadataTable, SeriesStore};

pub fn run(config: AppConfig) {
    println!("📊 Correlation Data Status\n");

    let rt = runtime();
    if let Err(e) = rt.block_on(show_status(&config)) {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn show_status(config: &AppConfig) -> Result<()> {
    let store = SeriesStore::new(config.data_dir.clone());
    println!("📁 Data directory: {}", config.data_dir.display());

    let mut total = 0;
    for source in [
        SourceMode::Price,
        SourceMode::FredMd,
        SourceMode::FredApi,
        SourceMode::FredApiAsReported,
    ] {
        let ids = store.list_identifiers(source).await?;
        total += ids.len();
        let marker = if ids.is_empty() { "⚪" } else { "🔹" };
        println!("   {} {:<22} {:>6} series", marker, source.as_str(), ids.len());
    }

    if total == 0 {
        println!("\n⚠️  No series found. Point --data-dir or CORR_DATA_DIR at a populated data directory.");
    }

    let metadata = MetadataTable::load(&config.data_dir.join(layout::METADATA_DIR)).await?;
    println!("\n🏷️  Metadata rows: {}", metadata.len());

    let cache = CorrelationCache::new(config.cache_dir.clone());
    let (files, bytes) = cache.disk_usage().await?;
    println!(
        "💾 Cached rankings: {} ({:.2} MB) in {}",
        files,
        bytes as f64 / (1024.0 * 1024.0),
        config.cache_dir.display()
    );
    println!("\n💡 Settings: min points {}, default top-n {}", config.min_points, config.default_top_n);

    Ok(())
}
