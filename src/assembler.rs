//! Turns a dashboard request into its final JSON payload: input validation,
//! cache lookup, fan-out, derived metrics and write-through.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::aggregator::{AggregateStatus, Aggregated, Aggregator};
use crate::cache::{CacheScopes, cache_key};
use crate::date_range::DateRange;
use crate::derived;
use crate::directory::{Brand, BrandDirectory};
use crate::error::{AppError, Result};
use crate::sources::http::number;
use crate::sources::{SourceKind, SourceRequest};

const SOCIAL_KINDS: [SourceKind; 2] = [SourceKind::Facebook, SourceKind::Instagram];
const TOP_POSTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
    Partial,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
            CacheStatus::Partial => "PARTIAL",
        }
    }
}

/// Inputs shared by the dashboard endpoints.
#[derive(Debug, Clone, Default)]
pub struct DashboardParams {
    pub brand_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
    pub bypass_cache: bool,
}

#[derive(Debug, Clone)]
pub struct Assembled {
    pub body: Value,
    pub cache_status: CacheStatus,
}

#[derive(Debug, Clone, Copy)]
enum Report {
    Summary,
    Social,
}

impl Report {
    fn scope(self) -> &'static str {
        match self {
            Report::Summary => "summary",
            Report::Social => "social",
        }
    }

    fn kinds(self) -> &'static [SourceKind] {
        match self {
            Report::Summary => &SourceKind::ALL,
            Report::Social => &SOCIAL_KINDS,
        }
    }
}

pub struct Assembler {
    brands: Arc<dyn BrandDirectory>,
    aggregator: Arc<Aggregator>,
    caches: Arc<CacheScopes>,
    default_range_days: u32,
    meta_token_configured: bool,
}

impl Assembler {
    pub fn new(
        brands: Arc<dyn BrandDirectory>,
        aggregator: Arc<Aggregator>,
        caches: Arc<CacheScopes>,
        default_range_days: u32,
        meta_token_configured: bool,
    ) -> Self {
        Self {
            brands,
            aggregator,
            caches,
            default_range_days,
            meta_token_configured,
        }
    }

    /// Visitors, social, ads and sales for one brand.
    pub async fn summary(&self, params: &DashboardParams) -> Result<Assembled> {
        self.assemble(Report::Summary, params, Utc::now().date_naive())
            .await
    }

    /// Facebook and Instagram only, with per-post detail.
    pub async fn social(&self, params: &DashboardParams) -> Result<Assembled> {
        self.assemble(Report::Social, params, Utc::now().date_naive())
            .await
    }

    async fn assemble(
        &self,
        report: Report,
        params: &DashboardParams,
        today: NaiveDate,
    ) -> Result<Assembled> {
        let brand_id = params
            .brand_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("'brandId' is required".to_string()))?;
        let range = DateRange::resolve(
            params.from.as_deref(),
            params.to.as_deref(),
            today,
            self.default_range_days,
        )?;

        let key = cache_key(
            report.scope(),
            &json!({
                "brandId": brand_id,
                "from": range.from_ymd(),
                "to": range.to_ymd(),
                "limit": params.limit,
            }),
        );
        if !params.bypass_cache {
            if let Some(hit) = key.as_deref().and_then(|k| self.caches.summaries.get(k)) {
                info!(brand_id, report = report.scope(), "cache hit");
                return Ok(Assembled {
                    body: hit,
                    cache_status: CacheStatus::Hit,
                });
            }
        }

        let brand = self
            .brands
            .find_brand(brand_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "Brand",
                id: brand_id.to_string(),
            })?;

        if matches!(report, Report::Social) && !self.has_meta_token(&brand) {
            return Err(AppError::MissingConfig("META_ACCESS_TOKEN".to_string()));
        }

        let request = SourceRequest {
            brand,
            range,
            limit: params.limit,
        };
        let aggregated = self.aggregator.run(&request, report.kinds()).await;
        let status = aggregated.status();

        let mut body = match report {
            Report::Summary => summary_body(brand_id, &range, &aggregated),
            Report::Social => social_body(brand_id, &range, &aggregated),
        };
        annotate(&mut body, &aggregated);

        if status == AggregateStatus::Failed {
            warn!(brand_id, report = report.scope(), "every source failed, not caching");
        } else if let Some(key) = key {
            self.caches.summaries.set(key, body.clone());
        }

        let cache_status = if params.bypass_cache {
            CacheStatus::Bypass
        } else if matches!(status, AggregateStatus::Partial | AggregateStatus::Failed) {
            CacheStatus::Partial
        } else {
            CacheStatus::Miss
        };
        info!(
            brand_id,
            report = report.scope(),
            cache = cache_status.as_str(),
            "payload assembled"
        );
        Ok(Assembled { body, cache_status })
    }

    fn has_meta_token(&self, brand: &Brand) -> bool {
        self.meta_token_configured
            || brand.fb_page_token.as_deref().is_some_and(|t| !t.is_empty())
            || brand.fb_user_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

fn summary_body(brand_id: &str, range: &DateRange, aggregated: &Aggregated) -> Value {
    let visitors = aggregated.slot(SourceKind::Visitors);
    let ads = aggregated.slot(SourceKind::Ads);
    let sales = aggregated.slot(SourceKind::Sales);
    let facebook = without_details(aggregated.slot(SourceKind::Facebook));
    let instagram = without_details(aggregated.slot(SourceKind::Instagram));

    let sessions = number(visitors.get("sessions"));
    let engaged = number(visitors.get("engagedSessions"));
    let spend = number(ads.get("spend"));
    let impressions = number(ads.get("impressions"));
    let clicks = number(ads.get("clicks"));
    let revenue = number(sales.get("revenue"));
    let transactions = number(sales.get("transactions"));

    let social_totals = social_totals(&facebook, &instagram);

    json!({
        "success": true,
        "brandId": brand_id,
        "dateRange": { "from": range.from_ymd(), "to": range.to_ymd() },
        "visitors": extend(visitors, [
            ("bounceRate", json!(derived::bounce_rate(sessions, engaged))),
        ]),
        "social": {
            "facebook": facebook,
            "instagram": instagram,
            "totals": social_totals,
        },
        "ads": extend(ads, [
            ("ctr", json!(derived::ctr(clicks, impressions))),
            ("cpc", json!(derived::cpc(spend, clicks))),
            ("cpm", json!(derived::cpm(spend, impressions))),
        ]),
        "sales": extend(sales, [
            ("averageOrderValue", json!(derived::average_order_value(revenue, transactions))),
        ]),
        "sources": aggregated.outcomes(),
        "generatedAt": Utc::now().to_rfc3339(),
    })
}

fn social_body(brand_id: &str, range: &DateRange, aggregated: &Aggregated) -> Value {
    let facebook = aggregated.slot(SourceKind::Facebook);
    let instagram = aggregated.slot(SourceKind::Instagram);

    let mut top: Vec<Value> = [("facebook", &facebook), ("instagram", &instagram)]
        .into_iter()
        .flat_map(|(platform, slot)| {
            slot.get("details")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(move |post| extend(post, [("platform", json!(platform))]))
        })
        .collect();
    top.sort_by(|a, b| {
        number(b.get("engagement"))
            .total_cmp(&number(a.get("engagement")))
            .then_with(|| {
                let id = |v: &Value| {
                    v.get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                id(a).cmp(&id(b))
            })
    });
    top.truncate(TOP_POSTS);

    json!({
        "success": true,
        "brandId": brand_id,
        "dateRange": { "from": range.from_ymd(), "to": range.to_ymd() },
        "totals": social_totals(&facebook, &instagram),
        "facebook": facebook,
        "instagram": instagram,
        "topPosts": top,
        "sources": aggregated.outcomes(),
        "generatedAt": Utc::now().to_rfc3339(),
    })
}

fn social_totals(facebook: &Value, instagram: &Value) -> Value {
    let sum = |field: &str| number(facebook.get(field)) + number(instagram.get(field));
    let engagement = sum("engagement");
    let impressions = sum("impressions");
    json!({
        "posts": sum("posts") as u64,
        "engagement": engagement,
        "impressions": impressions,
        "engagementRate": derived::engagement_rate(engagement, impressions),
    })
}

/// Adds the aggregate `warning`/`error` marker for degraded results.
fn annotate(body: &mut Value, aggregated: &Aggregated) {
    let Some(object) = body.as_object_mut() else {
        return;
    };
    let failed: Vec<&str> = aggregated
        .outcomes()
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.source.name())
        .collect();

    match aggregated.status() {
        AggregateStatus::Complete => {}
        AggregateStatus::Partial => {
            object.insert(
                "warning".into(),
                json!(format!("Some data sources failed: {}", failed.join(", "))),
            );
        }
        AggregateStatus::Failed => {
            object.insert(
                "error".into(),
                json!(format!("All data sources failed: {}", failed.join(", "))),
            );
        }
        AggregateStatus::Empty => {
            object.insert(
                "warning".into(),
                json!("No data sources are configured for this brand"),
            );
        }
    }
}

fn extend<const N: usize>(value: Value, fields: [(&str, Value); N]) -> Value {
    let mut object = match value {
        Value::Object(object) => object,
        _ => Map::new(),
    };
    for (key, field) in fields {
        object.insert(key.to_string(), field);
    }
    Value::Object(object)
}

fn without_details(mut slot: Value) -> Value {
    if let Some(object) = slot.as_object_mut() {
        object.remove("details");
    }
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryBrands;
    use crate::sources::{AdapterResult, DataSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        kind: SourceKind,
        calls: Arc<AtomicUsize>,
        result: AdapterResult,
    }

    #[async_trait]
    impl DataSource for Counting {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn applies_to(&self, _brand: &Brand) -> bool {
            true
        }

        async fn fetch(&self, _request: &SourceRequest) -> AdapterResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn assembler(sources: Vec<(SourceKind, AdapterResult)>) -> (Assembler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sources: Vec<Arc<dyn DataSource>> = sources
            .into_iter()
            .map(|(kind, result)| {
                Arc::new(Counting {
                    kind,
                    calls: calls.clone(),
                    result,
                }) as Arc<dyn DataSource>
            })
            .collect();
        let assembler = Assembler::new(
            Arc::new(InMemoryBrands::new([Brand::new("b1")])),
            Arc::new(Aggregator::new(sources, Duration::from_secs(1))),
            Arc::new(CacheScopes::new(Duration::from_secs(900), 0)),
            30,
            false,
        );
        (assembler, calls)
    }

    fn params(from: Option<&str>, to: Option<&str>) -> DashboardParams {
        DashboardParams {
            brand_id: Some("b1".into()),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bad_dates_fail_before_any_fetch() {
        let (assembler, calls) = assembler(vec![(SourceKind::Sales, AdapterResult::ok(json!({})))]);

        let err = assembler.summary(&params(Some("2024-13-01"), None)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = assembler
            .summary(&params(Some("2024-02-02"), Some("2024-02-01")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_derived_metrics_and_cache_hit() {
        let (assembler, calls) = assembler(vec![
            (
                SourceKind::Ads,
                AdapterResult::ok(json!({
                    "spend": 50.0,
                    "impressions": 10000,
                    "clicks": 200,
                    "reach": 8000,
                })),
            ),
            (
                SourceKind::Sales,
                AdapterResult::ok(json!({
                    "revenue": 300.0,
                    "transactions": 4,
                    "currency": "USD",
                })),
            ),
        ]);
        let p = params(Some("2024-01-01"), Some("2024-01-31"));

        let first = assembler.summary(&p).await.unwrap();
        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(first.body["ads"]["ctr"], 2.0);
        assert_eq!(first.body["ads"]["cpc"], 0.25);
        assert_eq!(first.body["ads"]["cpm"], 5.0);
        assert_eq!(first.body["sales"]["averageOrderValue"], 75.0);
        assert_eq!(first.body["visitors"]["bounceRate"], 0.0);

        let second = assembler.summary(&p).await.unwrap();
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(second.body, first.body);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_failed_is_reported_and_not_cached() {
        let (assembler, calls) =
            assembler(vec![(SourceKind::Visitors, AdapterResult::failed("auth"))]);
        let p = params(None, None);

        let first = assembler.summary(&p).await.unwrap();
        assert!(first.body["error"].as_str().unwrap().contains("visitors"));
        assert_eq!(first.cache_status, CacheStatus::Partial);

        let second = assembler.summary(&p).await.unwrap();
        assert_ne!(second.cache_status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_brand_and_missing_id() {
        let (assembler, _) = assembler(vec![]);
        let err = assembler
            .summary(&DashboardParams {
                brand_id: Some("nope".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "Brand", .. }));

        let err = assembler.summary(&DashboardParams::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_social_requires_meta_token() {
        let (assembler, _) = assembler(vec![]);
        let err = assembler.social(&params(None, None)).await.unwrap_err();
        assert!(matches!(err, AppError::MissingConfig(name) if name == "META_ACCESS_TOKEN"));
    }

    #[test]
    fn test_social_top_posts_ranked_by_engagement() {
        let mut aggregated = Aggregated::empty(&SOCIAL_KINDS);
        aggregated.merge(
            SourceKind::Facebook,
            AdapterResult::ok(json!({
                "posts": 2, "engagement": 30, "impressions": 600,
                "details": [{ "id": "f1", "engagement": 10 }, { "id": "f2", "engagement": 20 }],
            })),
        );
        aggregated.merge(
            SourceKind::Instagram,
            AdapterResult::ok(json!({
                "posts": 1, "engagement": 15, "impressions": 0,
                "details": [{ "id": "i1", "engagement": 15 }],
            })),
        );

        let range = DateRange::resolve(None, None, Utc::now().date_naive(), 7).unwrap();
        let body = social_body("b1", &range, &aggregated);
        let ids: Vec<&str> = body["topPosts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["f2", "i1", "f1"]);
        assert_eq!(body["topPosts"][1]["platform"], "instagram");
        assert_eq!(body["totals"]["posts"], json!(3));
        assert!(body["totals"]["posts"].is_u64());
        assert_eq!(body["totals"]["engagementRate"], 7.5);
    }
}
