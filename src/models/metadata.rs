use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::MISSING_SENTINELS;

/// A metadata attribute that is either known or explicitly unknown
///
/// `Missing` is a value in its own right: a predicate that references a
/// `Missing` field never passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Field<T> {
    Present(T),
    Missing,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<T> Field<T> {
    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Field::Present(v) => Field::Present(v),
            Field::Missing => Field::Missing,
        }
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Field::Present(v) => Some(v),
            Field::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Field::Missing)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Present(v) => Field::Present(f(v)),
            Field::Missing => Field::Missing,
        }
    }
}

impl Field<String> {
    /// Parse a raw metadata cell, mapping sentinels like `nan` to `Missing`
    pub fn parse_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_SENTINELS.contains(&trimmed) {
            Field::Missing
        } else {
            Field::Present(trimmed.to_string())
        }
    }
}

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Present(v) => write!(f, "{}", v),
            Field::Missing => write!(f, "Missing"),
        }
    }
}

/// Kind of security, taken from the metadata file it was listed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityType {
    Stock,
    Etf,
    Index,
}

impl SecurityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityType::Stock => "stock",
            SecurityType::Etf => "etf",
            SecurityType::Index => "index",
        }
    }

    /// Metadata file holding this security type
    pub fn file_name(&self) -> &'static str {
        match self {
            SecurityType::Stock => "stocks.csv",
            SecurityType::Etf => "etfs.csv",
            SecurityType::Index => "indices.csv",
        }
    }

    pub fn all() -> [SecurityType; 3] {
        [SecurityType::Stock, SecurityType::Etf, SecurityType::Index]
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market capitalization bucket, ordered smallest to largest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCap {
    Nano,
    Micro,
    Small,
    Mid,
    Large,
    Mega,
}

impl MarketCap {
    /// Parse a bucket name such as `Large Cap` or `mid`
    pub fn from_str(s: &str) -> Result<Self, String> {
        let normalized = s.trim().to_lowercase();
        let name = normalized
            .strip_suffix("cap")
            .unwrap_or(&normalized)
            .trim()
            .trim_end_matches('-');
        match name {
            "nano" => Ok(MarketCap::Nano),
            "micro" => Ok(MarketCap::Micro),
            "small" => Ok(MarketCap::Small),
            "mid" => Ok(MarketCap::Mid),
            "large" => Ok(MarketCap::Large),
            "mega" => Ok(MarketCap::Mega),
            _ => Err(format!(
                "Invalid market cap: '{}'. Valid values: nano, micro, small, mid, large, mega",
                s
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCap::Nano => "nano",
            MarketCap::Micro => "micro",
            MarketCap::Small => "small",
            MarketCap::Mid => "mid",
            MarketCap::Large => "large",
            MarketCap::Mega => "mega",
        }
    }
}

impl fmt::Display for MarketCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Filterable metadata attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    SecurityType,
    Sector,
    IndustryGroup,
    Industry,
    Market,
    Exchange,
    Country,
    MarketCap,
    Otc,
}

impl MetadataField {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "type" | "security_type" => Ok(MetadataField::SecurityType),
            "sector" => Ok(MetadataField::Sector),
            "industry_group" => Ok(MetadataField::IndustryGroup),
            "industry" => Ok(MetadataField::Industry),
            "market" => Ok(MetadataField::Market),
            "exchange" => Ok(MetadataField::Exchange),
            "country" => Ok(MetadataField::Country),
            "market_cap" | "cap" => Ok(MetadataField::MarketCap),
            "otc" | "is_otc" => Ok(MetadataField::Otc),
            _ => Err(format!("Unknown metadata field: '{}'", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::SecurityType => "type",
            MetadataField::Sector => "sector",
            MetadataField::IndustryGroup => "industry_group",
            MetadataField::Industry => "industry",
            MetadataField::Market => "market",
            MetadataField::Exchange => "exchange",
            MetadataField::Country => "country",
            MetadataField::MarketCap => "market_cap",
            MetadataField::Otc => "otc",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static descriptive attributes of one security
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetadata {
    pub symbol: String,
    pub name: Field<String>,
    pub security_type: Field<SecurityType>,
    pub sector: Field<String>,
    pub industry_group: Field<String>,
    pub industry: Field<String>,
    pub market: Field<String>,
    pub exchange: Field<String>,
    pub country: Field<String>,
    pub market_cap: Field<MarketCap>,
    pub is_otc: Field<bool>,
}

impl SecurityMetadata {
    /// Row for an identifier with no metadata at all
    pub fn unknown(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: Field::Missing,
            security_type: Field::Missing,
            sector: Field::Missing,
            industry_group: Field::Missing,
            industry: Field::Missing,
            market: Field::Missing,
            exchange: Field::Missing,
            country: Field::Missing,
            market_cap: Field::Missing,
            is_otc: Field::Missing,
        }
    }

    /// Derive the OTC flag from market and exchange text
    ///
    /// A security is OTC when either text mentions `OTC`. Missing only when
    /// neither text is known.
    pub fn derive_otc(market: &Field<String>, exchange: &Field<String>) -> Field<bool> {
        let texts: Vec<&String> = [market.present(), exchange.present()]
            .into_iter()
            .flatten()
            .collect();
        if texts.is_empty() {
            return Field::Missing;
        }
        Field::Present(texts.iter().any(|t| t.to_uppercase().contains("OTC")))
    }

    /// Textual value of `field`, used for case-insensitive matching
    pub fn text(&self, field: MetadataField) -> Field<String> {
        match field {
            MetadataField::SecurityType => self.security_type.as_ref().map(|t| t.as_str().to_string()),
            MetadataField::Sector => self.sector.clone(),
            MetadataField::IndustryGroup => self.industry_group.clone(),
            MetadataField::Industry => self.industry.clone(),
            MetadataField::Market => self.market.clone(),
            MetadataField::Exchange => self.exchange.clone(),
            MetadataField::Country => self.country.clone(),
            MetadataField::MarketCap => self.market_cap.as_ref().map(|c| c.as_str().to_string()),
            MetadataField::Otc => self.is_otc.as_ref().map(|b| b.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_parse_to_missing() {
        for raw in ["", "nan", "NaN", "Missing", "  None ", "N/A"] {
            assert!(Field::parse_text(raw).is_missing(), "{:?}", raw);
        }
        assert_eq!(
            Field::parse_text(" Technology "),
            Field::Present("Technology".to_string())
        );
    }

    #[test]
    fn test_market_cap_parsing_and_order() {
        assert_eq!(MarketCap::from_str("Large Cap").unwrap(), MarketCap::Large);
        assert_eq!(MarketCap::from_str("mid-cap").unwrap(), MarketCap::Mid);
        assert_eq!(MarketCap::from_str("NANO").unwrap(), MarketCap::Nano);
        assert!(MarketCap::from_str("huge").is_err());
        assert!(MarketCap::Nano < MarketCap::Small && MarketCap::Large < MarketCap::Mega);
    }

    #[test]
    fn test_derive_otc() {
        let otc = SecurityMetadata::derive_otc(
            &Field::Present("OTC Pink".to_string()),
            &Field::Missing,
        );
        let listed = SecurityMetadata::derive_otc(
            &Field::Present("us_market".to_string()),
            &Field::Present("NYQ".to_string()),
        );
        assert_eq!(otc, Field::Present(true));
        assert_eq!(listed, Field::Present(false));
        assert_eq!(
            SecurityMetadata::derive_otc(&Field::Missing, &Field::Missing),
            Field::Missing
        );
    }

    #[test]
    fn test_text_projection() {
        let mut meta = SecurityMetadata::unknown("AAPL");
        meta.security_type = Field::Present(SecurityType::Stock);
        meta.is_otc = Field::Present(false);

        assert_eq!(meta.text(MetadataField::SecurityType), Field::Present("stock".to_string()));
        assert_eq!(meta.text(MetadataField::Otc), Field::Present("false".to_string()));
        assert!(meta.text(MetadataField::Sector).is_missing());
    }

    #[test]
    fn test_metadata_field_from_str() {
        assert_eq!(MetadataField::from_str("type").unwrap(), MetadataField::SecurityType);
        assert_eq!(MetadataField::from_str("industry-group").unwrap(), MetadataField::IndustryGroup);
        assert!(MetadataField::from_str("ceo").is_err());
    }
}
