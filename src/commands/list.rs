use super::{parse_source, runtime};
use crate::models::AppConfig;
use crate::services::SeriesStore;

pub fn run(config: AppConfig, source: String) {
    let source = parse_source(&source);
    let store = SeriesStore::new(config.data_dir.clone());

    let rt = runtime();
    match rt.block_on(store.list_identifiers(source)) {
        Ok(ids) if ids.is_empty() => {
            println!("⚠️  No {} series found under {}", source, source.location(&config.data_dir).display());
        }
        Ok(ids) => {
            for id in &ids {
                println!("{}", id);
            }
            println!("\n📈 {} {} series", ids.len(), source);
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
