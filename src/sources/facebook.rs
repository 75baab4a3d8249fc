use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::graph::{GraphClient, edge_total, first_token};
use super::http::number;
use super::{AdapterResult, DataSource, MetricValue, SourceKind, SourceRequest};
use crate::cache::{CacheScopes, cache_key};
use crate::directory::Brand;
use crate::error::UpstreamError;

const POST_FIELDS: &str = "id,message,created_time,permalink_url,shares,\
reactions.summary(total_count).limit(0),comments.summary(total_count).limit(0)";

/// Impressions metrics in order of preference.
const IMPRESSION_METRICS: [&str; 2] = ["post_impressions", "post_impressions_unique"];

/// Page posts with per-post impressions.
pub struct FacebookSource {
    graph: GraphClient,
    fallback_token: Option<String>,
    caches: Arc<CacheScopes>,
}

impl FacebookSource {
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

    /// Page token from the brand, else the page's token from the user's
    /// page list, else the user token itself.
    async fn page_token(&self, brand: &Brand, page_id: &str) -> Result<String, UpstreamError> {
        if let Some(token) = first_token([brand.fb_page_token.as_deref()]) {
            return Ok(token.to_string());
        }

        let user_token =
            first_token([brand.fb_user_token.as_deref(), self.fallback_token.as_deref()])
                .ok_or_else(|| {
                    UpstreamError::MissingCredential("facebook access token".to_string())
                })?;

        match self.page_list(user_token).await {
            Ok(pages) => {
                let page_token = pages
                    .as_array()
                    .into_iter()
                    .flatten()
                    .find(|p| p.get("id").and_then(Value::as_str) == Some(page_id))
                    .and_then(|p| p.get("access_token").and_then(Value::as_str));
                if let Some(token) = page_token {
                    return Ok(token.to_string());
                }
                debug!(page_id, "page not in account list, using token as-is");
            }
            Err(err) => warn!(page_id, error = %err, "page list lookup failed, using token as-is"),
        }
        Ok(user_token.to_string())
    }

    async fn page_list(&self, user_token: &str) -> Result<Value, UpstreamError> {
        let key = cache_key("fb_pages", &json!({ "token": user_token }));
        if let Some(hit) = key.as_deref().and_then(|k| self.caches.page_lists.get(k)) {
            return Ok(hit);
        }

        let params = [("fields", "id,name,access_token".to_string())];
        let pages = Value::Array(
            self.graph
                .get_collection("me/accounts", user_token, &params, 100)
                .await?,
        );
        if let Some(key) = key {
            self.caches.page_lists.set(key, pages.clone());
        }
        Ok(pages)
    }

    async fn posts(
        &self,
        page_id: &str,
        token: &str,
        request: &SourceRequest,
    ) -> Result<Vec<Value>, UpstreamError> {
        let limit = request.post_limit();
        let key = cache_key(
            "fb_posts",
            &json!({
                "page": page_id,
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
            ("fields", POST_FIELDS.to_string()),
            ("since", request.range.since_unix().to_string()),
            ("until", request.range.until_unix().to_string()),
        ];
        let posts = self
            .graph
            .get_collection(&format!("{}/posts", page_id), token, &params, limit)
            .await?;
        if let Some(key) = key {
            self.caches.post_lists.set(key, Value::Array(posts.clone()));
        }
        Ok(posts)
    }

    async fn collect(&self, request: &SourceRequest) -> Result<Value, UpstreamError> {
        let page_id = request
            .brand
            .fb_page_id
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingCredential("facebook page id".to_string()))?;
        let token = self.page_token(&request.brand, page_id).await?;
        let posts = self.posts(page_id, &token, request).await?;

        let engagement: Vec<(String, f64)> = posts
            .iter()
            .filter_map(|post| {
                let id = post.get("id")?.as_str()?.to_string();
                Some((id, post_engagement(post)))
            })
            .collect();
        let impressions = self
            .graph
            .resolve_impressions(&engagement, &token, &IMPRESSION_METRICS)
            .await;

        let details: Vec<Value> = posts
            .iter()
            .map(|post| {
                let id = post.get("id").and_then(Value::as_str).unwrap_or_default();
                let metric = impressions.get(id).copied().unwrap_or(MetricValue::Unavailable);
                json!({
                    "id": id,
                    "message": post.get("message").and_then(Value::as_str).unwrap_or_default(),
                    "createdTime": post.get("created_time").cloned().unwrap_or(Value::Null),
                    "permalink": post.get("permalink_url").cloned().unwrap_or(Value::Null),
                    "reactions": edge_total(post, "reactions"),
                    "comments": edge_total(post, "comments"),
                    "shares": shares(post),
                    "engagement": post_engagement(post),
                    "impressions": metric,
                })
            })
            .collect();

        let total_engagement: f64 = engagement.iter().map(|(_, e)| e).sum();
        let total_impressions: f64 = impressions.values().map(MetricValue::value).sum();

        info!(page_id, posts = details.len(), "facebook posts collected");
        Ok(json!({
            "posts": details.len(),
            "engagement": total_engagement,
            "impressions": total_impressions,
            "impressions_metric": MetricValue::summarize(impressions.values()),
            "details": details,
        }))
    }
}

fn shares(post: &Value) -> f64 {
    number(post.pointer("/shares/count"))
}

fn post_engagement(post: &Value) -> f64 {
    edge_total(post, "reactions") + edge_total(post, "comments") + shares(post)
}

#[async_trait]
impl DataSource for FacebookSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Facebook
    }

    fn applies_to(&self, brand: &Brand) -> bool {
        brand.fb_page_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult {
        self.collect(request).await.into()
    }
}
