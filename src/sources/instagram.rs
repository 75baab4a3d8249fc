use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::graph::{GraphClient, first_token};
use super::http::number;
use super::{AdapterResult, DataSource, MetricValue, SourceKind, SourceRequest};
use crate::cache::{CacheScopes, cache_key};
use crate::date_range::DateRange;
use crate::directory::Brand;
use crate::error::UpstreamError;

const MEDIA_FIELDS: &str = "id,caption,media_type,timestamp,permalink,like_count,comments_count";

/// `impressions` was retired for newer media; `reach` and `views` stand in.
const IMPRESSION_METRICS: [&str; 3] = ["impressions", "reach", "views"];

/// Business-account media with per-item impressions.
pub struct InstagramSource {
    graph: GraphClient,
    fallback_token: Option<String>,
    caches: Arc<CacheScopes>,
}

impl InstagramSource {
    pub fn new(
        graph: GraphClient,
        fallback_token: Option<String>,
        caches: Arc<CacheScopes>,
    ) -> Self {
        Self {
            graph,
            fallback_token,
            caches,
        }
    }

    fn token<'a>(&'a self, brand: &'a Brand) -> Result<&'a str, UpstreamError> {
        first_token([
            brand.fb_page_token.as_deref(),
            brand.fb_user_token.as_deref(),
            self.fallback_token.as_deref(),
        ])
        .ok_or_else(|| UpstreamError::MissingCredential("instagram access token".to_string()))
    }

    async fn account(&self, account_id: &str, token: &str) -> Result<Value, UpstreamError> {
        let key = cache_key("ig_account", &json!({ "account": account_id }));
        if let Some(hit) = key.as_deref().and_then(|k| self.caches.account_info.get(k)) {
            return Ok(hit);
        }

        let params = [("fields", "id,username,followers_count,media_count".to_string())];
        let account = self.graph.get(account_id, token, &params).await?;
        if let Some(key) = key {
            self.caches.account_info.set(key, account.clone());
        }
        Ok(account)
    }

    async fn media(
        &self,
        account_id: &str,
        token: &str,
        request: &SourceRequest,
    ) -> Result<Vec<Value>, UpstreamError> {
        let limit = request.post_limit();
        let key = cache_key(
            "ig_media",
            &json!({
                "account": account_id,
                "from": request.range.from_ymd(),
                "to": request.range.to_ymd(),
                "limit": limit,
            }),
        );
        let cached = key.as_deref().and_then(|k| self.caches.post_lists.get(k));
        if let Some(Value::Array(hit)) = cached {
            return Ok(hit);
        }

        let params = [
            ("fields", MEDIA_FIELDS.to_string()),
            ("since", request.range.since_unix().to_string()),
            ("until", request.range.until_unix().to_string()),
        ];
        let media: Vec<Value> = self
            .graph
            .get_collection(&format!("{}/media", account_id), token, &params, limit)
            .await?
            .into_iter()
            .filter(|item| in_range(item, &request.range))
            .collect();

        if let Some(key) = key {
            self.caches.post_lists.set(key, Value::Array(media.clone()));
        }
        Ok(media)
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Value, UpstreamError> {
        let account_id = request
            .brand
            .ig_account_id
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingCredential("instagram account id".to_string()))?;
        let token = self.token(&request.brand)?;

        // follower count is a nice-to-have, media is what the slot is about
        let followers = match self.account(account_id, token).await {
            Ok(account) => number(account.get("followers_count")),
            Err(err) => {
                warn!(account_id, error = %err, "instagram account lookup failed");
                0.0
            }
        };

        let media = self.media(account_id, token, request).await?;
        let engagement: Vec<(String, f64)> = media
            .iter()
            .filter_map(|item| {
                let id = item.get("id")?.as_str()?.to_string();
                Some((id, media_engagement(item)))
            })
            .collect();
        let impressions = self
            .graph
            .resolve_impressions(&engagement, token, &IMPRESSION_METRICS)
            .await;

        let details: Vec<Value> = media
            .iter()
            .map(|item| {
                let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
                json!({
                    "id": id,
                    "caption": item.get("caption").and_then(Value::as_str).unwrap_or_default(),
                    "mediaType": item.get("media_type").cloned().unwrap_or(Value::Null),
                    "timestamp": item.get("timestamp").cloned().unwrap_or(Value::Null),
                    "permalink": item.get("permalink").cloned().unwrap_or(Value::Null),
                    "likes": number(item.get("like_count")),
                    "comments": number(item.get("comments_count")),
                    "engagement": media_engagement(item),
                    "impressions": impressions.get(id).copied().unwrap_or(MetricValue::Unavailable),
                })
            })
            .collect();

        let total_engagement: f64 = engagement.iter().map(|(_, e)| e).sum();
        let total_impressions: f64 = impressions.values().map(MetricValue::value).sum();

        info!(account_id, posts = details.len(), "instagram media collected");
        Ok(json!({
            "posts": details.len(),
            "followers": followers,
            "engagement": total_engagement,
            "impressions": total_impressions,
            "impressions_metric": MetricValue::summarize(impressions.values()),
            "details": details,
        }))
    }
}

fn media_engagement(item: &Value) -> f64 {
    number(item.get("like_count")) + number(item.get("comments_count"))
}

/// Media timestamps look like `2024-01-05T10:00:00+0000`. Items without a
/// parseable timestamp are kept.
fn in_range(item: &Value, range: &DateRange) -> bool {
    let Some(raw) = item.get("timestamp").and_then(Value::as_str) else {
        return true;
    };
    let day: Option<NaiveDate> = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|ts| ts.naive_utc().date());
    match day {
        Some(day) => day >= range.from && day <= range.to,
        None => true,
    }
}

#[async_trait]
impl DataSource for InstagramSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Instagram
    }

    fn applies_to(&self, brand: &Brand) -> bool {
        brand.ig_account_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult {
        self.collect(request).await.into()
    }
}
