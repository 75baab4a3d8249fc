use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::models::{
    DashboardQuery, HealthResponse, OrganizationListResponse, OrganizationQuery,
    OrganizationResponse,
};
use crate::api::response;
use crate::assembler::Assembled;
use crate::error::{AppError, Result, UpstreamError};
use crate::organizations::{self, NewOrganization, OrganizationPatch};
use crate::AppState;

/// Ceiling for a whole dashboard request, above the per-source timeouts.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(90);

/// Query extraction whose failure is answered through [`AppError`].
type QueryResult<T> = std::result::Result<Query<T>, QueryRejection>;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/summary-stats",
            get(summary_stats_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/social-insights",
            get(social_insights_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/organizations",
            get(get_organizations_handler)
                .post(create_organization_handler)
                .patch(update_organization_handler)
                .put(update_organization_handler)
                .delete(delete_organization_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn health_handler() -> impl IntoResponse {
    response::success(HealthResponse { status: "ok" })
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
        .into_response()
}

async fn summary_stats_handler(
    State(state): State<AppState>,
    query: QueryResult<DashboardQuery>,
) -> Result<Response> {
    let Query(query) = query?;
    info!(brand_id = ?query.brand_id, "summary stats requested");
    let max_age = state.config.cache_ttl.as_secs();
    let assembled = run_dashboard(query, |params| async move {
        state.assembler.summary(&params).await
    })
    .await?;

    Ok(response::cached(assembled, max_age))
}

async fn social_insights_handler(
    State(state): State<AppState>,
    query: QueryResult<DashboardQuery>,
) -> Result<Response> {
    let Query(query) = query?;
    info!(brand_id = ?query.brand_id, "social insights requested");
    let max_age = state.config.cache_ttl.as_secs();
    let assembled = run_dashboard(query, |params| async move {
        state.assembler.social(&params).await
    })
    .await?;

    Ok(response::cached(assembled, max_age))
}

/// Validates the query and runs one dashboard report under the overall
/// handler timeout.
async fn run_dashboard<F, Fut>(query: DashboardQuery, report: F) -> Result<Assembled>
where
    F: FnOnce(crate::assembler::DashboardParams) -> Fut,
    Fut: std::future::Future<Output = Result<Assembled>>,
{
    let start_time = Instant::now();
    let params = query.into_params()?;

    let result = tokio::time::timeout(HANDLER_TIMEOUT, report(params)).await;
    let elapsed = start_time.elapsed();
    info!(elapsed_ms = elapsed.as_millis() as u64, "dashboard request finished");

    match result {
        Ok(result) => result,
        Err(_) => {
            warn!("dashboard request timed out after {:?}", elapsed);
            Err(AppError::Upstream(UpstreamError::Timeout))
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    if body.is_empty() {
        return Err(AppError::Validation("Request body is required".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
}

async fn get_organizations_handler(
    State(state): State<AppState>,
    query: QueryResult<OrganizationQuery>,
) -> Result<Response> {
    let Query(query) = query?;
    let include_deleted = query.include_deleted();

    if let Some(id) = query.organization_id.as_deref() {
        let organization =
            organizations::fetch(state.organizations.as_ref(), id, include_deleted).await?;
        return Ok(response::success(OrganizationResponse {
            success: true,
            organization,
        })
        .into_response());
    }

    let user_id = query.user_id.as_deref().ok_or_else(|| {
        AppError::Validation("'organizationId' or 'userId' is required".to_string())
    })?;
    let organizations =
        organizations::list_for_user(state.organizations.as_ref(), user_id, include_deleted)
            .await?;
    Ok(response::success(OrganizationListResponse {
        success: true,
        organizations,
    })
    .into_response())
}

async fn create_organization_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response> {
    let input: NewOrganization = parse_body(&body)?;
    let organization = organizations::create(state.organizations.as_ref(), input).await?;
    Ok(response::created(OrganizationResponse {
        success: true,
        organization,
    })
    .into_response())
}

async fn update_organization_handler(
    State(state): State<AppState>,
    query: QueryResult<OrganizationQuery>,
    body: Bytes,
) -> Result<Response> {
    let Query(query) = query?;
    let id = query.organization_id.unwrap_or_default();
    let mut patch: OrganizationPatch = parse_body(&body)?;
    if patch.user_id.is_empty() {
        patch.user_id = query.user_id.unwrap_or_default();
    }

    let organization = organizations::update(state.organizations.as_ref(), &id, patch).await?;
    Ok(response::success(OrganizationResponse {
        success: true,
        organization,
    })
    .into_response())
}

async fn delete_organization_handler(
    State(state): State<AppState>,
    query: QueryResult<OrganizationQuery>,
) -> Result<Response> {
    let Query(query) = query?;
    let id = query.organization_id.unwrap_or_default();
    let user_id = query.user_id.unwrap_or_default();

    let organization =
        organizations::soft_delete(state.organizations.as_ref(), &id, &user_id).await?;
    Ok(response::success(OrganizationResponse {
        success: true,
        organization,
    })
    .into_response())
}
