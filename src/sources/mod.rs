//! Upstream data-source adapters.
//!
//! Each adapter turns one third-party API into a stable, normalized JSON
//! shape and never lets an error escape `fetch`: failures come back as an
//! unsuccessful [`AdapterResult`] so the fan-out can continue with the rest.

pub mod ads;
pub mod analytics;
pub mod facebook;
pub mod graph;
pub mod http;
pub mod instagram;
pub mod sales;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::{Value, json};

use crate::cache::CacheScopes;
use crate::config::Config;
use crate::date_range::DateRange;
use crate::directory::Brand;
use crate::error::UpstreamError;

pub const DEFAULT_POST_LIMIT: usize = 25;
pub const MAX_POST_LIMIT: usize = 100;

/// The output slot an adapter owns. Slots are disjoint, so results can be
/// merged in any completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Visitors,
    Facebook,
    Instagram,
    Ads,
    Sales,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Visitors,
        SourceKind::Facebook,
        SourceKind::Instagram,
        SourceKind::Ads,
        SourceKind::Sales,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Visitors => "visitors",
            SourceKind::Facebook => "facebook",
            SourceKind::Instagram => "instagram",
            SourceKind::Ads => "ads",
            SourceKind::Sales => "sales",
        }
    }

    /// Zero-valued shape used when the adapter failed or did not run.
    pub fn default_slot(self) -> Value {
        match self {
            SourceKind::Visitors => json!({
                "sessions": 0,
                "engagedSessions": 0,
                "users": 0,
                "pageViews": 0,
            }),
            SourceKind::Facebook | SourceKind::Instagram => json!({ "posts": 0 }),
            SourceKind::Ads => json!({
                "spend": 0,
                "impressions": 0,
                "clicks": 0,
                "reach": 0,
            }),
            SourceKind::Sales => json!({
                "revenue": 0,
                "transactions": 0,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl AdapterResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl From<Result<Value, UpstreamError>> for AdapterResult {
    fn from(result: Result<Value, UpstreamError>) -> Self {
        match result {
            Ok(data) => AdapterResult::ok(data),
            Err(err) => AdapterResult::failed(err.to_string()),
        }
    }
}

/// How a metric value was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Measured(f64),
    Estimated { value: f64, basis: &'static str },
    Unavailable,
}

impl MetricValue {
    pub fn value(&self) -> f64 {
        match self {
            MetricValue::Measured(v) => *v,
            MetricValue::Estimated { value, .. } => *value,
            MetricValue::Unavailable => 0.0,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            MetricValue::Measured(_) => "measured",
            MetricValue::Estimated { .. } => "estimated",
            MetricValue::Unavailable => "unavailable",
        }
    }

    /// Strategy marker for a set of values: any estimate taints the total.
    pub fn summarize<'a>(values: impl IntoIterator<Item = &'a MetricValue>) -> &'static str {
        let mut any_measured = false;
        for value in values {
            match value {
                MetricValue::Estimated { .. } => return "estimated",
                MetricValue::Measured(_) => any_measured = true,
                MetricValue::Unavailable => {}
            }
        }
        if any_measured { "measured" } else { "unavailable" }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let basis = match self {
            MetricValue::Estimated { basis, .. } => Some(*basis),
            _ => None,
        };
        let mut map = serializer.serialize_map(Some(if basis.is_some() { 3 } else { 2 }))?;
        map.serialize_entry("value", &self.value())?;
        map.serialize_entry("source", self.source())?;
        if let Some(basis) = basis {
            map.serialize_entry("basis", basis)?;
        }
        map.end()
    }
}

/// Everything an adapter needs for one call.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub brand: Brand,
    pub range: DateRange,
    pub limit: Option<usize>,
}

impl SourceRequest {
    pub fn post_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_POST_LIMIT)
            .clamp(1, MAX_POST_LIMIT)
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the brand has the external account this source reads.
    fn applies_to(&self, brand: &Brand) -> bool;

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult;
}

/// All production adapters, wired to the configured upstreams.
pub fn build_sources(config: &Config, caches: Arc<CacheScopes>) -> Vec<Arc<dyn DataSource>> {
    let graph = graph::GraphClient::new(config.upstreams.graph_api_base.clone());
    let meta_token = config.credentials.meta_access_token.clone();

    let analytics: Arc<dyn DataSource> = Arc::new(analytics::AnalyticsSource::new(
        config.upstreams.analytics_api_base.clone(),
        config.credentials.analytics_access_token.clone(),
    ));
    let facebook: Arc<dyn DataSource> = Arc::new(facebook::FacebookSource::new(
        graph.clone(),
        meta_token.clone(),
        caches.clone(),
    ));
    let instagram: Arc<dyn DataSource> = Arc::new(instagram::InstagramSource::new(
        graph.clone(),
        meta_token.clone(),
        caches,
    ));
    let ads: Arc<dyn DataSource> = Arc::new(ads::AdSpendSource::new(graph, meta_token));
    let sales: Arc<dyn DataSource> = Arc::new(sales::SalesSource::new(
        config.upstreams.square_api_base.clone(),
        config.credentials.square_access_token.clone(),
    ));

    vec![analytics, facebook, instagram, ads, sales]
}
