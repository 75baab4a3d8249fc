//! Social-graph API plumbing shared by the Facebook, Instagram and ad-spend
//! adapters: authenticated GETs, cursor paging, multi-id insight batches and
//! the impressions fallback chain.

use std::collections::HashMap;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::MetricValue;
use super::http::{self, CLIENT, RetryPolicy, number};
use crate::error::UpstreamError;

/// Ids per multi-id request; the Graph API caps `ids=` at 50.
pub const INSIGHTS_BATCH_SIZE: usize = 50;

/// Industry-average engagement rate used to back out impressions when no
/// impressions metric can be read (impressions ~= engagement / rate).
pub const ENGAGEMENT_RATE_BASELINE: f64 = 0.05;

const MAX_PAGES: usize = 10;

#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// GET `{base}/{path}` with the access token as a query parameter.
    pub async fn get(
        &self,
        path: &str,
        token: &str,
        params: &[(&str, String)],
    ) -> Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("access_token", token.to_string()));

        self.retry
            .run(path, || http::get_json(&self.client, &url, &query, None))
            .await
    }

    /// Collects `data` items across `after` cursors until `limit` items or
    /// the last page.
    pub async fn get_collection(
        &self,
        path: &str,
        token: &str,
        params: &[(&str, String)],
        limit: usize,
    ) -> Result<Vec<Value>, UpstreamError> {
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = params.to_vec();
            query.push(("limit", limit.min(100).to_string()));
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page = self.get(path, token, &query).await?;
            let data = page
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    UpstreamError::Decode(format!("{} response has no data array", path))
                })?;
            items.extend(data.iter().cloned());

            let has_next = page.pointer("/paging/next").is_some();
            after = page
                .pointer("/paging/cursors/after")
                .and_then(Value::as_str)
                .map(str::to_string);

            if items.len() >= limit || !has_next || after.is_none() || data.is_empty() {
                break;
            }
        }

        items.truncate(limit);
        Ok(items)
    }

    /// Reads one insights metric for many object ids in a single request.
    /// Ids the upstream returns no value for are simply absent from the map.
    pub async fn insights_batch(
        &self,
        ids: &[String],
        token: &str,
        metric: &str,
    ) -> Result<HashMap<String, f64>, UpstreamError> {
        let params = [
            ("ids", ids.join(",")),
            ("fields", format!("insights.metric({})", metric)),
        ];
        let body = self.get("", token, &params).await?;
        let object = body
            .as_object()
            .ok_or_else(|| UpstreamError::Decode("insights batch is not an object".to_string()))?;

        let mut values = HashMap::new();
        for (id, entry) in object {
            let Some(series) = entry.pointer("/insights/data").and_then(Value::as_array) else {
                continue;
            };
            let found = series
                .iter()
                .find(|s| s.get("name").and_then(Value::as_str) == Some(metric))
                .and_then(insight_value);
            if let Some(value) = found {
                values.insert(id.clone(), value);
            }
        }
        Ok(values)
    }

    /// Resolves impressions for every `(id, engagement)` pair: each batch
    /// tries `metrics` in order, and whatever is still unresolved is
    /// estimated from engagement. A failing batch only degrades its own ids.
    pub async fn resolve_impressions(
        &self,
        posts: &[(String, f64)],
        token: &str,
        metrics: &[&str],
    ) -> HashMap<String, MetricValue> {
        let mut resolved = HashMap::new();

        for batch in posts.chunks(INSIGHTS_BATCH_SIZE) {
            let mut pending: Vec<String> = batch.iter().map(|(id, _)| id.clone()).collect();
            debug!(size = pending.len(), "fetching insights batch");

            for metric in metrics {
                if pending.is_empty() {
                    break;
                }
                match self.insights_batch(&pending, token, metric).await {
                    Ok(values) => {
                        pending.retain(|id| match values.get(id) {
                            Some(v) => {
                                resolved.insert(id.clone(), MetricValue::Measured(*v));
                                false
                            }
                            None => true,
                        });
                    }
                    Err(UpstreamError::MissingMetric(msg)) => {
                        debug!(metric, %msg, "metric not available, trying next");
                    }
                    Err(err) => {
                        warn!(
                            metric,
                            error = %err,
                            "insights batch failed, falling back to estimates"
                        );
                        break;
                    }
                }
            }

            for (id, engagement) in batch {
                resolved
                    .entry(id.clone())
                    .or_insert_with(|| estimate_from_engagement(*engagement));
            }
        }

        resolved
    }
}

fn insight_value(series: &Value) -> Option<f64> {
    if let Some(total) = series.pointer("/total_value/value") {
        return Some(number(Some(total)));
    }
    series
        .get("values")
        .and_then(Value::as_array)
        .and_then(|values| values.last())
        .map(|point| number(point.get("value")))
}

pub fn estimate_from_engagement(engagement: f64) -> MetricValue {
    if engagement <= 0.0 {
        return MetricValue::Unavailable;
    }
    MetricValue::Estimated {
        value: (engagement / ENGAGEMENT_RATE_BASELINE).round(),
        basis: "engagement",
    }
}

/// First configured token in order of preference. Blank values count as
/// absent so they never shadow a later candidate.
pub fn first_token<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
}

/// `summary.total_count` of an edge such as `reactions` or `comments`.
pub fn edge_total(item: &Value, edge: &str) -> f64 {
    number(item.get(edge).and_then(|e| e.pointer("/summary/total_count")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_uses_baseline_ratio() {
        assert_eq!(
            estimate_from_engagement(10.0),
            MetricValue::Estimated { value: 200.0, basis: "engagement" }
        );
        assert_eq!(estimate_from_engagement(0.0), MetricValue::Unavailable);
    }

    #[test]
    fn test_insight_value_shapes() {
        let lifetime = json!({ "name": "post_impressions", "values": [{ "value": 321 }] });
        assert_eq!(insight_value(&lifetime), Some(321.0));

        let total = json!({ "name": "views", "total_value": { "value": 42 } });
        assert_eq!(insight_value(&total), Some(42.0));

        assert_eq!(insight_value(&json!({ "name": "reach" })), None);
    }

    #[test]
    fn test_first_token_skips_blank_candidates() {
        assert_eq!(first_token([Some(""), Some("  "), Some("env")]), Some("env"));
        assert_eq!(first_token([None, Some("brand"), Some("env")]), Some("brand"));
        assert_eq!(first_token([Some(""), None]), None);
    }

    #[test]
    fn test_edge_total() {
        let post = json!({ "reactions": { "summary": { "total_count": 9 } } });
        assert_eq!(edge_total(&post, "reactions"), 9.0);
        assert_eq!(edge_total(&post, "comments"), 0.0);
    }
}
