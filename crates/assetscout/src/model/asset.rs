use serde::{Deserialize, Serialize};

use super::company::normalize_name;

/// A physical asset (plant, mine, warehouse, ...) discovered for a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isin: Option<String>,
    pub facility_name: String,
    pub asset_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Asset {
    /// Creates an asset with the required fields only.
    pub fn new(
        company_name: impl Into<String>,
        facility_name: impl Into<String>,
        asset_type: impl Into<String>,
    ) -> Self {
        Self {
            company_name: company_name.into(),
            isin: None,
            facility_name: facility_name.into(),
            asset_type: asset_type.into(),
            city: None,
            country: None,
            latitude: None,
            longitude: None,
        }
    }

    /// Sets the city.
    pub fn in_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Normalized facility name used for dedup.
    pub fn facility_key(&self) -> String {
        normalize_name(&self.facility_name)
    }

    /// `city|asset_type` composite key, only when a city is known.
    pub fn location_key(&self) -> Option<String> {
        let city = self
            .city
            .as_deref()
            .map(normalize_name)
            .filter(|c| !c.is_empty())?;
        Some(format!("{}|{}", city, normalize_name(&self.asset_type)))
    }
}
