use actix_web::{HttpResponse, get, web};
use pulsewatch_service::Orchestrator;
use pulsewatch_service::database::SiteStore;
use serde_json::json;

use crate::error::ServerError;

/// Aggregate counters across all sites
#[get("/stats")]
pub async fn stats_route(state: web::Data<Orchestrator>) -> Result<HttpResponse, ServerError> {
    let stats = state.store().get_stats().await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "stats": stats })))
}

/// Scheduler, lock and last run state
#[get("/status")]
pub async fn status_route(state: web::Data<Orchestrator>) -> Result<HttpResponse, ServerError> {
    let status = state.status().await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "status": status })))
}
