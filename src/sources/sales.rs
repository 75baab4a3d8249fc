use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::http::{self, CLIENT, RetryPolicy, number};
use super::{AdapterResult, DataSource, SourceKind, SourceRequest};
use crate::derived::round2;
use crate::directory::Brand;
use crate::error::UpstreamError;

const PAGE_SIZE: u32 = 500;
const MAX_PAGES: usize = 10;

/// Completed point-of-sale orders for a location.
pub struct SalesSource {
    client: Client,
    base: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl SalesSource {
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
        let location = request
            .brand
            .square_location_id
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingCredential("sales location id".to_string()))?;
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::MissingCredential("sales access token".to_string()))?;

        let url = format!("{}/orders/search", self.base);
        let mut totals = OrderTotals::default();
        let mut cursor: Option<String> = None;

        for page in 0..MAX_PAGES {
            let mut body = json!({
                "location_ids": [location],
                "limit": PAGE_SIZE,
                "return_entries": false,
                "query": {
                    "filter": {
                        "state_filter": { "states": ["COMPLETED"] },
                        "date_time_filter": {
                            "closed_at": {
                                "start_at": request.range.start_rfc3339(),
                                "end_at": request.range.end_rfc3339(),
                            }
                        }
                    },
                    "sort": { "sort_field": "CLOSED_AT", "sort_order": "ASC" }
                }
            });
            if let Some(cursor) = &cursor {
                body["cursor"] = json!(cursor);
            }

            let response = self
                .retry
                .run("sales.searchOrders", || {
                    http::post_json(&self.client, &url, &body, Some(token))
                })
                .await?;
            totals.add_page(&response);

            cursor = response
                .get("cursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            debug!(page, orders = totals.transactions, "orders page read");
            if cursor.is_none() {
                break;
            }
            if page + 1 == MAX_PAGES {
                warn!(location, "order pagination cap reached, totals are partial");
            }
        }

        info!(location, transactions = totals.transactions, "sales collected");
        Ok(json!({
            "revenue": round2(totals.revenue_minor / 100.0),
            "transactions": totals.transactions,
            "currency": totals.currency,
        }))
    }
}

#[derive(Default)]
struct OrderTotals {
    revenue_minor: f64,
    transactions: u64,
    currency: Option<String>,
}

impl OrderTotals {
    fn add_page(&mut self, page: &Value) {
        let Some(orders) = page.get("orders").and_then(Value::as_array) else {
            return;
        };
        for order in orders {
            self.transactions += 1;
            self.revenue_minor += number(order.pointer("/total_money/amount"));
            if self.currency.is_none() {
                self.currency = order
                    .pointer("/total_money/currency")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
    }
}

#[async_trait]
impl DataSource for SalesSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Sales
    }

    fn applies_to(&self, brand: &Brand) -> bool {
        brand.square_location_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    async fn fetch(&self, request: &SourceRequest) -> AdapterResult {
        self.collect(request).await.into()
    }
}
