use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use super::http::{self, CLIENT, RetryPolicy, number};
use super::{AdapterResult, DataSource, SourceKind, SourceRequest};
use crate::directory::Brand;
use crate::error::UpstreamError;

/// Report metrics, in the order the response's `metricValues` follow.
const METRICS: [&str; 4] = ["sessions", "engagedSessions", "totalUsers", "screenPageViews"];

/// Web-analytics sessions for a property.
pub struct AnalyticsSource {
    client: Client,
    base: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl AnalyticsSource {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            token,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Value, UpstreamError> {
        let property = request
            .brand
            .ga_property_id
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingCredential("analytics property id".to_string()))?;
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::MissingCredential("analytics access token".to_string()))?;

        // the reporting API rejects end dates in the future
        let range = request.range.clamp_to_today(Utc::now().date_naive());
        let property = property.trim_start_matches("properties/");
        let url = format!("{}/properties/{}:runReport", self.base, property);
        let body = json!({
            "dateRanges": [{ "startDate": range.from_ymd(), "endDate": range.to_ymd() }],
            "metrics": METRICS.iter().map(|m| json!({ "name": m })).collect::<Vec<_>>(),
        });

        let report = self
            .retry
            .run("analytics.runReport", || {
                http::post_json(&self.client, &url, &body, Some(token))
            })
            .await?;

        let values = report_values(&report);
        info!(property, sessions = values[0], "analytics sessions collected");
        Ok(json!({
            "sessions": values[0],
            "engagedSessions": values[1],
            "users": values[2],
            "pageViews": values[3],
        }))
    }
}

/// Metric values of the first row; a report with no rows means no traffic.
fn report_values(report: &Value) -> [f64; 4] {
    let mut values = [0.0; 4];
    let cells = report
        .pointer("/rows/0/metricValues")
        .and_then(Value::as_array);
    if let Some(cells) = cells {
        for (slot, cell) in values.iter_mut().zip(cells) {
            *slot = number(cell.get("value"));
        }
    }
    values
}

#[async_trait]
impl DataSource for AnalyticsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Visitors
    }

    fn applies_to(&self, brand: &Brand) -> bool {
        brand.ga_property_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult {
        self.collect(request).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_values_reads_first_row() {
        let report = json!({
            "rows": [{
                "metricValues": [
                    { "value": "120" }, { "value": "80" }, { "value": "95" }, { "value": "400" }
                ]
            }]
        });
        assert_eq!(report_values(&report), [120.0, 80.0, 95.0, 400.0]);
    }

    #[test]
    fn test_report_without_rows_is_zero() {
        assert_eq!(report_values(&json!({ "rowCount": 0 })), [0.0; 4]);
    }
}
