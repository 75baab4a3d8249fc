//! Brand lookup. The document store behind it is an external collaborator;
//! this module defines the seam and an in-memory implementation that can be
//! seeded from a JSON file.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};

/// A brand and the external accounts configured for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fb_page_id: Option<String>,
    /// Page-scoped token, used as-is when present.
    #[serde(default, skip_serializing)]
    pub fb_page_token: Option<String>,
    /// User token the page token is resolved from.
    #[serde(default, skip_serializing)]
    pub fb_user_token: Option<String>,
    #[serde(default)]
    pub ig_account_id: Option<String>,
    #[serde(default)]
    pub ad_account_id: Option<String>,
    #[serde(default)]
    pub ga_property_id: Option<String>,
    #[serde(default)]
    pub square_location_id: Option<String>,
}

impl Brand {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait BrandDirectory: Send + Sync {
    async fn find_brand(&self, brand_id: &str) -> Result<Option<Brand>>;
}

#[derive(Default)]
pub struct InMemoryBrands {
    brands: HashMap<String, Brand>,
}

impl InMemoryBrands {
    pub fn new(brands: impl IntoIterator<Item = Brand>) -> Self {
        Self {
            brands: brands.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }

    /// Reads a JSON array of brands.
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Cannot read {}: {}", path, e)))?;
        let brands: Vec<Brand> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid brands file {}: {}", path, e)))?;
        info!(count = brands.len(), path, "loaded brands");
        Ok(Self::new(brands))
    }
}

#[async_trait]
impl BrandDirectory for InMemoryBrands {
    async fn find_brand(&self, brand_id: &str) -> Result<Option<Brand>> {
        Ok(self.brands.get(brand_id).cloned())
    }
}
