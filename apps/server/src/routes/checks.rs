use actix_web::{HttpResponse, post, web};
use pulsewatch_service::Orchestrator;
use pulsewatch_service::monitoring::{ErrorCategory, ManualOutcome, RunOutcome};
use serde_json::json;

use super::sites::SiteView;
use crate::error::ServerError;

/// Run one scheduled batch; for external cron
#[post("/checks/run")]
pub async fn run_checks_route(state: web::Data<Orchestrator>) -> Result<HttpResponse, ServerError> {
    match state.runner().run_checks().await? {
        RunOutcome::Skipped => Err(ServerError::Busy),
        RunOutcome::Completed(run) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": format!("Checked {} sites. Failed: {}", run.checked, run.failed),
            "checked": run.checked,
            "failed": run.failed,
            "duration": run.duration,
        }))),
    }
}

#[post("/checks/all")]
pub async fn check_all_route(state: web::Data<Orchestrator>) -> Result<HttpResponse, ServerError> {
    match state.runner().manual_check_all().await? {
        ManualOutcome::Busy => Err(ServerError::Busy),
        ManualOutcome::Finished(summary) => Ok(HttpResponse::Ok().json(summary)),
    }
}

/// Check one site now; failures are reported by category only
#[post("/sites/{id}/check")]
pub async fn check_site_route(
    state: web::Data<Orchestrator>,
    id: web::Path<i64>,
) -> Result<HttpResponse, ServerError> {
    let check = state.runner().check_site(*id).await?;

    let body = match check.result.error_message.as_deref().filter(|_| check.result.status.is_problem()) {
        Some(error) => {
            let category = ErrorCategory::from_message(error);
            json!({
                "success": false,
                "message": category.to_string(),
                "category": category,
                "site": SiteView::from(&check.site),
            })
        }
        None => json!({
            "success": true,
            "message": format!("Status: {}", check.result.status),
            "site": SiteView::from(&check.site),
        }),
    };
    Ok(HttpResponse::Ok().json(body))
}
