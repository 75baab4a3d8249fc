use serde::{Deserialize, Serialize};

use crate::assembler::DashboardParams;
use crate::error::{AppError, Result};
use crate::organizations::Organization;

/// Query string of the dashboard endpoints. Everything arrives as text and
/// is validated here so malformed input gets a JSON 400.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    pub brand_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
    pub cache: Option<String>,
}

impl DashboardQuery {
    pub fn bypass_cache(&self) -> bool {
        matches!(self.cache.as_deref().map(str::trim), Some("0") | Some("false"))
    }

    pub fn into_params(self) -> Result<DashboardParams> {
        let bypass_cache = self.bypass_cache();
        let limit = self
            .limit
            .as_deref()
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|_| {
                    AppError::Validation(format!(
                        "'limit' must be a positive integer, got '{}'",
                        raw
                    ))
                })
            })
            .transpose()?;

        Ok(DashboardParams {
            brand_id: self.brand_id,
            from: self.from.filter(|v| !v.trim().is_empty()),
            to: self.to.filter(|v| !v.trim().is_empty()),
            limit,
            bypass_cache,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationQuery {
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub include_deleted: Option<String>,
}

impl OrganizationQuery {
    pub fn include_deleted(&self) -> bool {
        matches!(self.include_deleted.as_deref().map(str::trim), Some("true") | Some("1"))
    }
}

#[derive(Serialize)]
pub struct OrganizationResponse {
    pub success: bool,
    pub organization: Organization,
}

#[derive(Serialize)]
pub struct OrganizationListResponse {
    pub success: bool,
    pub organizations: Vec<Organization>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
