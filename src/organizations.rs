//! Organization records with soft-delete semantics.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};

const ENTITY: &str = "Organization";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.created_by == user_id || self.members.iter().any(|m| m == user_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationPatch {
    #[serde(default)]
    pub user_id: String,
    pub name: Option<String>,
    pub archived: Option<bool>,
    pub members: Option<Vec<String>>,
}

/// Storage seam for organization documents.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Organization>>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Organization>>;
    async fn save(&self, organization: Organization) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryOrganizations {
    records: RwLock<HashMap<String, Organization>>,
}

impl InMemoryOrganizations {
    pub fn new(records: impl IntoIterator<Item = Organization>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|o| (o.id.clone(), o)).collect()),
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Cannot read {}: {}", path, e)))?;
        let records: Vec<Organization> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid organizations file {}: {}", path, e)))?;
        info!(count = records.len(), path, "loaded organizations");
        Ok(Self::new(records))
    }

    fn poisoned() -> AppError {
        AppError::Internal("organization store lock poisoned".to_string())
    }
}

#[async_trait]
impl OrganizationStore for InMemoryOrganizations {
    async fn get(&self, id: &str) -> Result<Option<Organization>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Organization>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut found: Vec<Organization> = records
            .values()
            .filter(|o| o.is_visible_to(user_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn save(&self, organization: Organization) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert(organization.id.clone(), organization);
        Ok(())
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound {
        entity: ENTITY,
        id: id.to_string(),
    }
}

fn gone(id: &str) -> AppError {
    AppError::Gone {
        entity: ENTITY,
        id: id.to_string(),
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("'{}' is required", field)));
    }
    Ok(())
}

/// Loads one organization. Soft-deleted and archived records answer 410
/// unless `include_deleted` is set.
pub async fn fetch(
    store: &dyn OrganizationStore,
    id: &str,
    include_deleted: bool,
) -> Result<Organization> {
    require("organizationId", id)?;
    let organization = store.get(id).await?.ok_or_else(|| not_found(id))?;
    if (organization.deleted || organization.archived) && !include_deleted {
        return Err(gone(id));
    }
    Ok(organization)
}

/// Organizations a user created or belongs to. Deleted and archived ones are
/// left out unless `include_deleted` is set.
pub async fn list_for_user(
    store: &dyn OrganizationStore,
    user_id: &str,
    include_deleted: bool,
) -> Result<Vec<Organization>> {
    require("userId", user_id)?;
    let organizations = store.list_for_user(user_id).await?;
    Ok(organizations
        .into_iter()
        .filter(|o| include_deleted || !(o.deleted || o.archived))
        .collect())
}

pub async fn create(store: &dyn OrganizationStore, input: NewOrganization) -> Result<Organization> {
    require("name", &input.name)?;
    require("userId", &input.user_id)?;

    let now = Utc::now();
    let mut members = input.members;
    if !members.contains(&input.user_id) {
        members.insert(0, input.user_id.clone());
    }

    let organization = Organization {
        id: Uuid::new_v4().to_string(),
        name: input.name.trim().to_string(),
        created_by: input.user_id,
        members,
        created_at: now,
        updated_at: now,
        deleted: false,
        deleted_at: None,
        archived: false,
        archived_at: None,
    };
    store.save(organization.clone()).await?;
    info!(organization_id = %organization.id, "organization created");
    Ok(organization)
}

/// Partial update, creator only.
pub async fn update(
    store: &dyn OrganizationStore,
    id: &str,
    patch: OrganizationPatch,
) -> Result<Organization> {
    require("organizationId", id)?;
    require("userId", &patch.user_id)?;

    let mut organization = store.get(id).await?.ok_or_else(|| not_found(id))?;
    if organization.created_by != patch.user_id {
        return Err(AppError::Unauthorized(
            "Only the organization creator can modify it".to_string(),
        ));
    }
    if organization.deleted {
        return Err(gone(id));
    }

    let now = Utc::now();
    if let Some(name) = patch.name {
        require("name", &name)?;
        organization.name = name.trim().to_string();
    }
    if let Some(archived) = patch.archived {
        if archived != organization.archived {
            organization.archived = archived;
            organization.archived_at = archived.then_some(now);
        }
    }
    if let Some(members) = patch.members {
        organization.members = members;
        if !organization.members.contains(&organization.created_by) {
            organization.members.insert(0, organization.created_by.clone());
        }
    }
    organization.updated_at = now;

    store.save(organization.clone()).await?;
    Ok(organization)
}

/// Marks the organization deleted, creator only. Deleting twice answers 410.
pub async fn soft_delete(
    store: &dyn OrganizationStore,
    id: &str,
    user_id: &str,
) -> Result<Organization> {
    require("organizationId", id)?;
    require("userId", user_id)?;

    let mut organization = store.get(id).await?.ok_or_else(|| not_found(id))?;
    if organization.created_by != user_id {
        return Err(AppError::Unauthorized(
            "Only the organization creator can delete it".to_string(),
        ));
    }
    if organization.deleted {
        return Err(gone(id));
    }

    let now = Utc::now();
    organization.deleted = true;
    organization.deleted_at = Some(now);
    organization.updated_at = now;
    store.save(organization.clone()).await?;
    info!(organization_id = %id, "organization soft-deleted");
    Ok(organization)
}
