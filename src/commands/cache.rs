//! `cache` subcommands: list, invalidate and stats

use super::runtime;
use crate::models::AppConfig;
use crate::services::CorrelationCache;
use std::collections::BTreeMap;

pub fn list(config: AppConfig) {
    let cache = CorrelationCache::new(config.cache_dir.clone());
    let rt = runtime();

    match rt.block_on(cache.list_entries()) {
        Ok(entries) if entries.is_empty() => {
            println!("⚠️  No cached rankings in {}", config.cache_dir.display());
        }
        Ok(entries) => {
            println!("💾 {} cached ranking(s) in {}\n", entries.len(), config.cache_dir.display());
            for entry in &entries {
                println!(
                    "   {:<40} {:>5} ranked  {}  data {}",
                    entry.key.to_string(),
                    entry.result.len(),
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.fingerprint
                );
            }
        }
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn invalidate(config: AppConfig, target: String) {
    let target = target.trim().to_string();
    let cache = CorrelationCache::new(config.cache_dir);
    let rt = runtime();

    // Entries may belong to a ticker or to a case-sensitive macro code
    let result = rt.block_on(async {
        let mut removed = 0;
        for identifier in invalidation_targets(&target) {
            removed += cache.invalidate_all_for_identifier(&identifier).await?;
        }
        Ok::<_, crate::error::AppError>(removed)
    });

    match result {
        Ok(0) => println!("ℹ️  Nothing cached for {}", target),
        Ok(removed) => println!("🗑️  Removed {} cached ranking(s) for {}", removed, target),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// The identifier as typed plus its ticker spelling, without duplicates
fn invalidation_targets(target: &str) -> Vec<String> {
    let mut targets = vec![target.to_string()];
    let ticker = target.to_uppercase();
    if ticker != target {
        targets.push(ticker);
    }
    targets
}

pub fn stats(config: AppConfig) {
    let cache = CorrelationCache::new(config.cache_dir.clone());
    let rt = runtime();

    let result = rt.block_on(async {
        let (files, bytes) = cache.disk_usage().await?;
        // Reading every entry also weeds out corrupt files
        let entries = cache.list_entries().await?;
        Ok::<_, crate::error::AppError>((files, bytes, entries, cache.stats().await))
    });

    let (files, bytes, entries, stats) = match result {
        Ok(values) => values,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut per_target: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &entries {
        *per_target.entry(entry.key.target.as_str()).or_default() += 1;
    }

    println!("💾 Cache directory: {}", config.cache_dir.display());
    println!("   Files:    {}", files);
    println!("   Size:     {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
    println!("   Readable: {}", entries.len());
    println!("   Corrupt:  {} (removed)", stats.corrupt);
    println!("   Targets:  {}", per_target.len());
    for (target, count) in per_target {
        println!("      {:<12} {}", target, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_targets() {
        assert_eq!(invalidation_targets("SPY"), vec!["SPY"]);
        assert_eq!(invalidation_targets("spy"), vec!["spy", "SPY"]);
        assert_eq!(invalidation_targets("S&P div yield"), vec!["S&P div yield", "S&P DIV YIELD"]);
    }
}
