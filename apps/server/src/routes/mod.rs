use actix_web::web;

mod checks;
mod health;
mod sites;
mod status;
mod webhook;

/// Register every route on the app
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health_route)
        .service(status::stats_route)
        .service(status::status_route)
        .service(sites::list_sites_route)
        .service(sites::add_site_route)
        .service(sites::delete_site_route)
        .service(checks::check_site_route)
        .service(checks::run_checks_route)
        .service(checks::check_all_route)
        .service(webhook::test_webhook_route);
}
