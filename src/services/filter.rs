use crate::error::{AppError, Result};
use crate::models::{Field, MarketCap, MetadataField, RankedCandidate, SecurityMetadata};
use crate::services::metadata::MetadataLookup;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A constraint over one metadata attribute
///
/// A candidate whose referenced attribute is Missing never satisfies the
/// predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Attribute text is one of `accepted` (stored lowercase, compared case-insensitively)
    OneOf {
        field: MetadataField,
        accepted: BTreeSet<String>,
    },
    /// Market cap bucket within `min..=max`
    MarketCapBetween { min: MarketCap, max: MarketCap },
}

impl Predicate {
    pub fn one_of<S: AsRef<str>>(field: MetadataField, values: impl IntoIterator<Item = S>) -> Self {
        Predicate::OneOf {
            field,
            accepted: values
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    /// Only securities known not to trade over the counter
    pub fn exclude_otc() -> Self {
        Self::one_of(MetadataField::Otc, ["false"])
    }

    pub fn market_cap_between(min: MarketCap, max: MarketCap) -> Self {
        if min <= max {
            Predicate::MarketCapBetween { min, max }
        } else {
            Predicate::MarketCapBetween { min: max, max: min }
        }
    }

    /// Parse `field=v1,v2` or `market_cap=small..large`
    pub fn parse(text: &str) -> Result<Self> {
        let (field, values) = text
            .split_once('=')
            .ok_or_else(|| AppError::InvalidInput(format!("Filter '{}' must look like field=value[,value]", text)))?;
        let field = MetadataField::from_str(field).map_err(AppError::InvalidInput)?;

        if field == MetadataField::MarketCap && values.contains("..") {
            return Self::parse_cap_range(values);
        }

        let predicate = Self::one_of(field, values.split(','));
        match &predicate {
            Predicate::OneOf { accepted, .. } if accepted.is_empty() => Err(AppError::InvalidInput(
                format!("Filter '{}' has no accepted values", text),
            )),
            _ => Ok(predicate),
        }
    }

    /// Parse `small..large`; either side may be omitted
    pub fn parse_cap_range(range: &str) -> Result<Self> {
        let (low, high) = range
            .split_once("..")
            .ok_or_else(|| AppError::InvalidInput(format!("Market cap range '{}' must look like min..max", range)))?;
        let bound = |raw: &str, default: MarketCap| -> Result<MarketCap> {
            if raw.trim().is_empty() {
                Ok(default)
            } else {
                MarketCap::from_str(raw).map_err(AppError::InvalidInput)
            }
        };
        Ok(Self::market_cap_between(
            bound(low, MarketCap::Nano)?,
            bound(high, MarketCap::Mega)?,
        ))
    }

    pub fn field(&self) -> MetadataField {
        match self {
            Predicate::OneOf { field, .. } => *field,
            Predicate::MarketCapBetween { .. } => MetadataField::MarketCap,
        }
    }

    pub fn matches(&self, metadata: &SecurityMetadata) -> bool {
        match self {
            Predicate::OneOf { field, accepted } => match metadata.text(*field) {
                Field::Present(value) => accepted.contains(&value.to_lowercase()),
                Field::Missing => false,
            },
            Predicate::MarketCapBetween { min, max } => match metadata.market_cap {
                Field::Present(cap) => *min <= cap && cap <= *max,
                Field::Missing => false,
            },
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::OneOf { field, accepted } => {
                let values: Vec<&str> = accepted.iter().map(String::as_str).collect();
                write!(f, "{}={}", field, values.join(","))
            }
            Predicate::MarketCapBetween { min, max } => write!(f, "market_cap={}..{}", min, max),
        }
    }
}

/// Whether `symbol` satisfies every predicate
///
/// A symbol without metadata has every field Missing, so it passes only
/// when no predicate is active.
pub fn passes<L: MetadataLookup + ?Sized>(symbol: &str, lookup: &L, predicates: &[Predicate]) -> bool {
    if predicates.is_empty() {
        return true;
    }
    match lookup.lookup(symbol) {
        Some(metadata) => predicates.iter().all(|p| p.matches(metadata)),
        None => false,
    }
}

/// Narrow a candidate universe to the identifiers passing all predicates
///
/// Order of `identifiers` is preserved.
pub fn filter_universe<L: MetadataLookup + ?Sized>(
    identifiers: &[String],
    lookup: &L,
    predicates: &[Predicate],
) -> Vec<String> {
    identifiers
        .iter()
        .filter(|id| passes(id, lookup, predicates))
        .cloned()
        .collect()
}

/// Narrow a ranking without re-running any correlation math
///
/// Returns the kept candidates in ranking order and how many were removed.
pub fn filter_ranked<'a, L: MetadataLookup + ?Sized>(
    ranked: &'a [RankedCandidate],
    lookup: &L,
    predicates: &[Predicate],
) -> (Vec<&'a RankedCandidate>, usize) {
    let kept: Vec<&RankedCandidate> = ranked
        .iter()
        .filter(|c| passes(&c.identifier, lookup, predicates))
        .collect();
    let removed = ranked.len() - kept.len();
    (kept, removed)
}
