use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::graph::{GraphClient, first_token};
use super::http::number;
use super::{AdapterResult, DataSource, SourceKind, SourceRequest};
use crate::derived::round2;
use crate::directory::Brand;
use crate::error::UpstreamError;

/// Account-level ad spend for the range.
pub struct AdSpendSource {
    graph: GraphClient,
    token: Option<String>,
}

impl AdSpendSource {
    pub fn new(graph: GraphClient, token: Option<String>) -> Self {
        Self { graph, token }
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Value, UpstreamError> {
        let account = request
            .brand
            .ad_account_id
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingCredential("ad account id".to_string()))?;
        let token = first_token([request.brand.fb_user_token.as_deref(), self.token.as_deref()])
            .ok_or_else(|| UpstreamError::MissingCredential("ads access token".to_string()))?;

        let account = account.trim_start_matches("act_");
        let time_range = json!({
            "since": request.range.from_ymd(),
            "until": request.range.to_ymd(),
        });
        let params = [
            ("fields", "spend,impressions,clicks,reach".to_string()),
            ("level", "account".to_string()),
            ("time_range", time_range.to_string()),
        ];
        let body = self
            .graph
            .get(&format!("act_{}/insights", account), token, &params)
            .await?;

        // no delivery in the range comes back as an empty data array
        let row = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .cloned()
            .unwrap_or(Value::Null);

        let spend = round2(number(row.get("spend")));
        info!(account, spend, "ad spend collected");
        Ok(json!({
            "spend": spend,
            "impressions": number(row.get("impressions")),
            "clicks": number(row.get("clicks")),
            "reach": number(row.get("reach")),
        }))
    }
}

#[async_trait]
impl DataSource for AdSpendSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ads
    }

    fn applies_to(&self, brand: &Brand) -> bool {
        brand.ad_account_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult {
        self.collect(request).await.into()
    }
}
