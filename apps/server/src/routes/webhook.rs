use actix_web::{HttpResponse, post, web};
use pulsewatch_service::Orchestrator;
use serde::Deserialize;
use serde_json::json;

use crate::error::ServerError;

#[derive(Debug, Default, Deserialize)]
pub struct WebhookTest {
    /// Falls back to the stored webhook URL
    url: Option<String>,
}

#[post("/webhook/test")]
pub async fn test_webhook_route(
    state: web::Data<Orchestrator>,
    body: Option<web::Json<WebhookTest>>,
) -> Result<HttpResponse, ServerError> {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    state.test_webhook(body.url.as_deref(), "api").await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "message": "Test notification sent" })))
}
