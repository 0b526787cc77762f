use serde::{Deserialize, Serialize};

/// One company submitted for discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyEntry {
    /// Company name as submitted.
    pub name: String,
    /// International Securities Identification Number, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    /// Known total asset value of the company.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_value: Option<f64>,
    /// Industry sector, forwarded to the supplementary review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

impl CompanyEntry {
    /// Creates an entry with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            isin: None,
            total_value: None,
            sector: None,
        }
    }

    /// Sets the ISIN.
    pub fn with_isin(mut self, isin: impl Into<String>) -> Self {
        self.isin = Some(isin.into());
        self
    }

    /// Sets the sector.
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    /// Sets the known total value.
    pub fn with_total_value(mut self, value: f64) -> Self {
        self.total_value = Some(value);
        self
    }

    /// Canonical identity of this entry: the ISIN when present, else the
    /// normalized name.
    pub fn identity_key(&self) -> IdentityKey {
        identity_key(&self.name, self.isin.as_deref())
    }

    /// Legacy display form `"name (isin)"`, or just the name without an ISIN.
    pub fn display_name(&self) -> String {
        match self.isin.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(isin) => format!("{} ({})", self.name.trim(), isin),
            None => self.name.trim().to_string(),
        }
    }

    /// Returns true if a recorded result with `name`/`isin` belongs to this entry.
    ///
    /// When both sides carry an ISIN, the ISIN decides. Otherwise the
    /// normalized name must match either the entry name or its display form.
    pub fn matches(&self, name: &str, isin: Option<&str>) -> bool {
        self.matches_with(name, isin, true)
    }

    /// Like [`matches`](Self::matches), but with `bare_name` false a record
    /// and an entry of which only one carries an ISIN never match on the
    /// plain name. The legacy display form still matches.
    pub fn matches_with(&self, name: &str, isin: Option<&str>, bare_name: bool) -> bool {
        let candidate = normalize_name(name);
        match (normalize_isin(self.isin.as_deref()), normalize_isin(isin)) {
            (Some(ours), Some(theirs)) => ours == theirs,
            (Some(_), None) => {
                candidate == normalize_name(&self.display_name())
                    || (bare_name && candidate == normalize_name(&self.name))
            }
            (None, Some(_)) => bare_name && candidate == normalize_name(&self.name),
            (None, None) => candidate == normalize_name(&self.name),
        }
    }
}

/// True when no other entry in `entries` shares `entry`'s normalized name.
/// Only then may a record be matched to `entry` by its bare name.
pub fn name_is_unique(entries: &[CompanyEntry], entry: &CompanyEntry) -> bool {
    let name = normalize_name(&entry.name);
    entries
        .iter()
        .filter(|other| normalize_name(&other.name) == name)
        .count()
        <= 1
}

/// Canonical per-company key used for dedup and resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Isin(String),
    Name(String),
}

/// Builds the identity key for a company.
pub fn identity_key(name: &str, isin: Option<&str>) -> IdentityKey {
    match normalize_isin(isin) {
        Some(isin) => IdentityKey::Isin(isin),
        None => IdentityKey::Name(normalize_name(name)),
    }
}

/// Lower-cases, trims and collapses internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_isin(isin: Option<&str>) -> Option<String> {
    isin.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
}
