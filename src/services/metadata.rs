use crate::error::Result;
use crate::models::{Field, MarketCap, MetadataField, MetadataMap, SecurityMetadata, SecurityType};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Read access to security metadata by symbol
pub trait MetadataLookup {
    fn lookup(&self, symbol: &str) -> Option<&SecurityMetadata>;
}

impl MetadataLookup for MetadataMap {
    fn lookup(&self, symbol: &str) -> Option<&SecurityMetadata> {
        self.get(symbol)
    }
}

/// Metadata for every known security, loaded once per process
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: MetadataMap,
}

impl MetadataLookup for MetadataTable {
    fn lookup(&self, symbol: &str) -> Option<&SecurityMetadata> {
        self.rows.get(symbol)
    }
}

impl MetadataTable {
    pub fn from_rows(rows: impl IntoIterator<Item = SecurityMetadata>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.symbol.clone(), row)).collect(),
        }
    }

    /// Load `stocks.csv`, `etfs.csv` and `indices.csv` from `dir`
    ///
    /// Missing files are skipped. A symbol listed in several files keeps
    /// the first row seen (stocks, then ETFs, then indices).
    pub async fn load(dir: &Path) -> Result<Self> {
        let mut rows: MetadataMap = HashMap::new();

        for security_type in SecurityType::all() {
            let path = dir.join(security_type.file_name());
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No metadata file at {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let parsed = parse_metadata_csv(&bytes, security_type)?;
            let count = parsed.len();
            for row in parsed {
                rows.entry(row.symbol.clone()).or_insert(row);
            }
            debug!("Loaded {} {} metadata rows", count, security_type);
        }

        info!("Metadata table ready with {} symbols", rows.len());
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Metadata for `symbol`, with every field Missing when unknown
    pub fn get_or_unknown(&self, symbol: &str) -> SecurityMetadata {
        self.rows
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SecurityMetadata::unknown(symbol))
    }

    /// Distinct present values of `field` among `symbols`, sorted
    ///
    /// Used to offer filter choices for a result set.
    pub fn unique_values<'a>(&self, field: MetadataField, symbols: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let values: BTreeSet<String> = symbols
            .into_iter()
            .filter_map(|symbol| self.rows.get(symbol))
            .filter_map(|row| match row.text(field) {
                Field::Present(value) => Some(value),
                Field::Missing => None,
            })
            .collect();
        values.into_iter().collect()
    }
}

/// Parse one metadata file; the security type comes from the file
pub fn parse_metadata_csv(bytes: &[u8], security_type: SecurityType) -> Result<Vec<SecurityMetadata>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let Some(symbol_idx) = column("symbol") else {
        warn!("{} metadata has no 'symbol' column, skipping", security_type);
        return Ok(Vec::new());
    };
    let name_idx = column("name");
    let sector_idx = column("sector");
    let industry_group_idx = column("industry_group");
    let industry_idx = column("industry");
    let market_idx = column("market");
    let exchange_idx = column("exchange");
    let country_idx = column("country");
    let market_cap_idx = column("market_cap");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let text = |idx: Option<usize>| -> Field<String> {
            idx.and_then(|i| record.get(i))
                .map(Field::parse_text)
                .unwrap_or(Field::Missing)
        };

        let symbol = match text(Some(symbol_idx)) {
            Field::Present(symbol) => symbol,
            Field::Missing => continue,
        };

        let market = text(market_idx);
        let exchange = text(exchange_idx);
        let market_cap = match text(market_cap_idx) {
            Field::Present(raw) => match MarketCap::from_str(&raw) {
                Ok(cap) => Field::Present(cap),
                Err(_) => {
                    debug!("{}: unrecognised market cap '{}'", symbol, raw);
                    Field::Missing
                }
            },
            Field::Missing => Field::Missing,
        };

        rows.push(SecurityMetadata {
            is_otc: SecurityMetadata::derive_otc(&market, &exchange),
            name: text(name_idx),
            security_type: Field::Present(security_type),
            sector: text(sector_idx),
            industry_group: text(industry_group_idx),
            industry: text(industry_idx),
            country: text(country_idx),
            symbol,
            market,
            exchange,
            market_cap,
        });
    }

    Ok(rows)
}
