use actix_web::{HttpResponse, delete, get, post, web};
use pulsewatch_service::Orchestrator;
use pulsewatch_service::database::SiteStore;
use pulsewatch_service::database::models::{Site, SiteFilter};
use pulsewatch_service::monitoring::types::SslHealth;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ServerError;

/// A site plus the figures derived from it
#[derive(Serialize)]
pub struct SiteView<'a> {
    #[serde(flatten)]
    site: &'a Site,
    uptime: f64,
    ssl_health: SslHealth,
}

impl<'a> From<&'a Site> for SiteView<'a> {
    fn from(site: &'a Site) -> Self {
        Self { site, uptime: site.uptime(), ssl_health: site.ssl_health() }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewSite {
    url: String,
    #[serde(default)]
    email: Option<String>,
}

/// `?status=&order_by=&order=&limit=`
#[get("/sites")]
pub async fn list_sites_route(
    state: web::Data<Orchestrator>,
    filter: web::Query<SiteFilter>,
) -> Result<HttpResponse, ServerError> {
    let sites = state.store().get_sites(&filter).await?;
    let views: Vec<SiteView> = sites.iter().map(SiteView::from).collect();
    Ok(HttpResponse::Ok().json(json!({ "success": true, "sites": views })))
}

#[post("/sites")]
pub async fn add_site_route(
    state: web::Data<Orchestrator>,
    body: web::Json<NewSite>,
) -> Result<HttpResponse, ServerError> {
    let site = state.add_site(&body.url, body.email.as_deref()).await?;
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Site added successfully",
        "site": SiteView::from(&site),
    })))
}

#[delete("/sites/{id}")]
pub async fn delete_site_route(
    state: web::Data<Orchestrator>,
    id: web::Path<i64>,
) -> Result<HttpResponse, ServerError> {
    if !state.store().delete_site(*id).await? {
        return Err(ServerError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true, "message": "Site deleted" })))
}
