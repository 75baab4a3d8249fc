use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dashboard_aggregator::api::routes::create_router;
use dashboard_aggregator::cache::CacheScopes;
use dashboard_aggregator::config::{Config, Credentials, Upstreams};
use dashboard_aggregator::directory::{Brand, InMemoryBrands};
use dashboard_aggregator::organizations::InMemoryOrganizations;
use dashboard_aggregator::sources::build_sources;
use dashboard_aggregator::AppState;
use serde_json::{Value, json};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Stand-in for the social graph: one page with two posts, where the
/// preferred impressions metric is rejected and the fallback only covers
/// the first post.
async fn fake_graph(hits: Arc<AtomicUsize>) -> SocketAddr {
    async fn accounts(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
        hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "data": [{ "id": "page-1", "access_token": "page-token" }] }))
    }

    async fn posts(State(hits): State<Arc<AtomicUsize>>) -> Json<Value> {
        hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "data": [
                {
                    "id": "post-1",
                    "message": "Spring menu",
                    "created_time": "2024-03-02T10:00:00+0000",
                    "reactions": { "summary": { "total_count": 30 } },
                    "comments": { "summary": { "total_count": 8 } },
                    "shares": { "count": 2 }
                },
                {
                    "id": "post-2",
                    "message": "Opening hours",
                    "created_time": "2024-03-05T10:00:00+0000",
                    "reactions": { "summary": { "total_count": 10 } },
                    "comments": { "summary": { "total_count": 5 } },
                    "shares": { "count": 5 }
                }
            ]
        }))
    }

    async fn insights(
        State(hits): State<Arc<AtomicUsize>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        hits.fetch_add(1, Ordering::SeqCst);
        let fields = params.get("fields").cloned().unwrap_or_default();
        if fields.contains("post_impressions_unique") {
            return (
                StatusCode::OK,
                Json(json!({
                    "post-1": {
                        "insights": {
                            "data": [{
                                "name": "post_impressions_unique",
                                "values": [{ "value": 120 }]
                            }]
                        }
                    }
                })),
            );
        }
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": 100,
                    "message": "(#100) The value must be a valid insights metric"
                }
            })),
        )
    }

    let app = Router::new()
        .route("/", get(insights))
        .route("/me/accounts", get(accounts))
        .route("/:page/posts", get(posts))
        .with_state(hits);
    serve(app).await
}

fn brand() -> Brand {
    Brand {
        fb_page_id: Some("page-1".into()),
        ..Brand::new("brand-1")
    }
}

async fn spawn_app(graph: SocketAddr, meta_token: Option<&str>) -> String {
    let config = Config {
        credentials: Credentials {
            meta_access_token: meta_token.map(str::to_string),
            ..Default::default()
        },
        upstreams: Upstreams {
            graph_api_base: format!("http://{}", graph),
            ..Default::default()
        },
        ..Default::default()
    };
    let caches = Arc::new(CacheScopes::new(config.cache_ttl, config.cache_max_entries));
    let sources = build_sources(&config, caches.clone());
    let state = AppState::with_parts(
        config,
        caches,
        Arc::new(InMemoryBrands::new([brand()])),
        Arc::new(InMemoryOrganizations::default()),
        sources,
    );
    let addr = serve(create_router(state)).await;
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_summary_is_served_from_cache_on_repeat() {
    let hits = Arc::new(AtomicUsize::new(0));
    let graph = fake_graph(hits.clone()).await;
    let base = spawn_app(graph, Some("user-token")).await;
    let url = format!("{}/api/summary-stats?brandId=brand-1&from=2024-03-01&to=2024-03-07", base);

    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-cache-status"], "MISS");
    let first_body = first.text().await.unwrap();
    let upstream_calls = hits.load(Ordering::SeqCst);
    assert!(upstream_calls > 0);

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["x-cache-status"], "HIT");
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.text().await.unwrap(), first_body);
    assert_eq!(hits.load(Ordering::SeqCst), upstream_calls);

    let body: Value = serde_json::from_str(&first_body).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["dateRange"], json!({ "from": "2024-03-01", "to": "2024-03-07" }));
    let facebook = &body["social"]["facebook"];
    assert_eq!(facebook["posts"], 2);
    assert_eq!(facebook["engagement"], 60.0);
    // post-1 measured by the fallback metric, post-2 estimated at 20 / 0.05
    assert_eq!(facebook["impressions"], 520.0);
    assert_eq!(facebook["impressions_metric"], "estimated");
    assert!(facebook.get("details").is_none());
}

#[tokio::test]
async fn test_social_insights_marks_estimated_impressions() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, Some("user-token")).await;

    let body: Value = reqwest::get(format!(
        "{}/api/social-insights?brandId=brand-1&from=2024-03-01&to=2024-03-07",
        base
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    let details = body["facebook"]["details"].as_array().unwrap();
    let post = |id: &str| details.iter().find(|p| p["id"] == id).unwrap().clone();
    assert_eq!(post("post-1")["impressions"], json!({ "value": 120.0, "source": "measured" }));
    assert_eq!(
        post("post-2")["impressions"],
        json!({ "value": 400.0, "source": "estimated", "basis": "engagement" })
    );

    let top = body["topPosts"].as_array().unwrap();
    assert_eq!(top[0]["id"], "post-1");
    assert_eq!(top[0]["platform"], "facebook");
}

#[tokio::test]
async fn test_missing_page_token_degrades_to_empty_slot() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;

    let response = reqwest::get(format!("{}/api/summary-stats?brandId=brand-1", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache-status"], "PARTIAL");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["social"]["facebook"], json!({ "posts": 0 }));
    assert_eq!(body["sources"][0]["source"], "facebook");
    assert_eq!(body["sources"][0]["success"], false);
    assert!(body["error"].as_str().unwrap().contains("facebook"));
}

#[tokio::test]
async fn test_invalid_date_is_rejected_before_any_upstream_call() {
    let hits = Arc::new(AtomicUsize::new(0));
    let graph = fake_graph(hits.clone()).await;
    let base = spawn_app(graph, Some("user-token")).await;

    let url = format!("{}/api/summary-stats?brandId=brand-1&from=03/01/2024", base);
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_brand_id_and_unknown_brand() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, Some("user-token")).await;

    let response = reqwest::get(format!("{}/api/summary-stats", base)).await.unwrap();
    assert_eq!(response.status(), 400);

    let response = reqwest::get(format!("{}/api/summary-stats?brandId=nope", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Brand not found", "brandId": "nope" }));
}

#[tokio::test]
async fn test_cache_bypass_is_not_cacheable() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, Some("user-token")).await;

    let response = reqwest::get(format!("{}/api/summary-stats?brandId=brand-1&cache=0", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-cache-status"], "BYPASS");
    assert_eq!(
        response.headers()["cache-control"],
        "no-cache, no-store, must-revalidate"
    );
}

#[tokio::test]
async fn test_preflight_and_method_handling() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("{}/api/summary-stats", base))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
    assert!(preflight.text().await.unwrap().is_empty());

    let wrong_method = client
        .post(format!("{}/api/summary-stats", base))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_method.status(), 405);

    let missing = client.get(format!("{}/api/nothing", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_organization_lifecycle() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/organizations", base);

    let missing = client
        .get(&url)
        .query(&[("organizationId", "missing")])
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "error": "Organization not found", "organizationId": "missing" })
    );

    let created = client
        .post(&url)
        .json(&json!({ "name": "Corner Bakery", "userId": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    let id = created["organization"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["organization"]["members"], json!(["alice"]));

    let listed: Value = client
        .get(&url)
        .query(&[("userId", "alice")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["organizations"].as_array().unwrap().len(), 1);

    let forbidden = client
        .delete(&url)
        .query(&[("organizationId", id.as_str()), ("userId", "mallory")])
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);
    let body: Value = forbidden.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");

    let deleted = client
        .delete(&url)
        .query(&[("organizationId", id.as_str()), ("userId", "alice")])
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);
    let deleted: Value = deleted.json().await.unwrap();
    assert_eq!(deleted["organization"]["deleted"], true);

    let again = client
        .delete(&url)
        .query(&[("organizationId", id.as_str()), ("userId", "alice")])
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 410);

    let invalid = client
        .post(&url)
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);
}

#[tokio::test]
async fn test_malformed_query_string_is_json_validation_error() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;

    for path in [
        "/api/summary-stats?brandId=b1&brandId=b2",
        "/api/social-insights?brandId=b1&brandId=b2",
        "/api/organizations?userId=a&userId=b",
    ] {
        let response = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        assert_eq!(response.status(), 400, "{}", path);
        assert_eq!(response.headers()["content-type"], "application/json");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Validation error");
        assert!(body["message"].as_str().unwrap().contains("duplicate field"));
    }
}

#[tokio::test]
async fn test_archived_organization_is_gone_by_default() {
    let graph = fake_graph(Arc::new(AtomicUsize::new(0))).await;
    let base = spawn_app(graph, None).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/organizations", base);

    let created: Value = client
        .post(&url)
        .json(&json!({ "name": "Harbor Cafe", "userId": "alice" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["organization"]["id"].as_str().unwrap().to_string();

    let archived = client
        .patch(&url)
        .query(&[("organizationId", id.as_str())])
        .json(&json!({ "userId": "alice", "archived": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(archived.status(), 200);

    let hidden = client
        .get(&url)
        .query(&[("organizationId", id.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(hidden.status(), 410);

    let included: Value = client
        .get(&url)
        .query(&[("organizationId", id.as_str()), ("includeDeleted", "true")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(included["organization"]["archived"], true);
}
