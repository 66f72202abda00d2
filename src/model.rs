use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::normalize_url;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ListingError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("listing markup is missing `{0}`")]
    MissingElement(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub m2: Option<f64>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub url: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "m2")]
    pub area_m2: Option<f64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub price: Option<f64>,
}

impl Listing {
    pub fn from_raw(raw: RawListing) -> Result<Self, ListingError> {
        let url = required_text(raw.url, "url")?;
        let name = required_text(raw.name, "name")?;
        let address = raw
            .address
            .map(|value| value.trim().to_string())
            .unwrap_or_default();

        if let Some(area) = raw.m2 {
            if !area.is_finite() || area <= 0.0 {
                return Err(ListingError::InvalidField {
                    field: "m2",
                    reason: format!("expected a positive area, got {area}"),
                });
            }
        }

        if let Some(price) = raw.price {
            if !price.is_finite() || price < 0.0 {
                return Err(ListingError::InvalidField {
                    field: "price",
                    reason: format!("expected a non-negative price, got {price}"),
                });
            }
        }

        Ok(Self {
            url,
            name,
            address,
            area_m2: raw.m2,
            bedrooms: raw.bedrooms,
            bathrooms: raw.bathrooms,
            price: raw.price,
        })
    }

    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }

    pub fn canonical_text(&self) -> String {
        let parts = [
            format!("Nombre: {}", self.name),
            format!("Dirección: {}", self.address),
            match self.area_m2 {
                Some(area) => format!("Superficie: {area} m²"),
                None => "Superficie: desconocida".to_string(),
            },
            match self.bedrooms {
                Some(count) => format!("Dormitorios: {count}"),
                None => "Dormitorios: desconocido".to_string(),
            },
            match self.bathrooms {
                Some(count) => format!("Baños: {count}"),
                None => "Baños: desconocido".to_string(),
            },
            match self.price {
                Some(price) => format!("Precio: {price} €"),
                None => "Precio: desconocido".to_string(),
            },
            format!("URL: {}", self.url),
        ];

        parts.join(" | ")
    }
}

impl TryFrom<RawListing> for Listing {
    type Error = ListingError;

    fn try_from(raw: RawListing) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ListingError> {
    let trimmed = value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    trimmed.ok_or(ListingError::MissingField(field))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRunRecord {
    pub task_run_id: String,
    pub task_name: String,
    pub state: TaskState,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub flow_run_id: String,
    pub tags: Vec<String>,
    pub listings: usize,
    pub retries: u32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub flow_run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub listings_scraped: usize,
    pub failed_seeds: usize,
    pub listings_enriched: usize,
    pub embedding_drops: usize,
    pub inserted: usize,
    pub updated: usize,
    pub reconcile_attempts: u32,
    pub status: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub manifest_version: u32,
    pub report: RunReport,
    pub tasks: Vec<TaskRunRecord>,
}
