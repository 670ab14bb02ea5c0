//! Scraped place record, idempotent by `place_id`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured postal address alongside the raw display form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub borough: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// External Google place identifier; the idempotency key for ingest.
    pub place_id: String,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub raw_address: String,
    /// Weekday → opening intervals.
    #[serde(default)]
    pub open_hours: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub plus_code: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: i64,
    /// Star rating → count histogram.
    #[serde(default)]
    pub reviews_per_rating: BTreeMap<String, i64>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub images: Vec<Image>,
    /// Already passed the business-email deny list.
    #[serde(default)]
    pub emails: Vec<String>,
}
