#![warn(clippy::all, clippy::pedantic)]

use std::env;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use actix_web::{App, HttpServer, web};
use pulsewatch_service::config::ServerConfig;
use pulsewatch_service::pool::open_pool;
use pulsewatch_service::{Config, Orchestrator};
use tracing::info;

mod error;
mod routes;

use error::AppError;
use logger::init_tracing_with;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let config = Config::from_config(env::var_os("PULSEWATCH_CONFIG"))?;
    init_tracing_with(&config.logging.level);

    let addrs = listen_addrs(&config.server)?;
    let pool = open_pool(&config.database.path).await?;
    let orchestrator = web::Data::new(Orchestrator::new(config, pool).await?);

    run_server(&addrs, orchestrator).await
}

/// Resolve the configured bind host and port; IPv6 literals need no brackets.
fn listen_addrs(server: &ServerConfig) -> io::Result<Vec<SocketAddr>> {
    Ok((server.bind.as_str(), server.port).to_socket_addrs()?.collect())
}

async fn run_server(addrs: &[SocketAddr], orchestrator: web::Data<Orchestrator>) -> Result<(), AppError> {
    for addr in addrs {
        info!("Listening on http://{}", addr);
    }

    HttpServer::new(move || App::new().app_data(orchestrator.clone()).configure(routes::routes))
        .bind(addrs)?
        .run()
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn server(bind: &str, port: u16) -> ServerConfig {
        ServerConfig { bind: bind.into(), port }
    }

    #[test]
    fn test_ipv4_bind_address() {
        let addrs = listen_addrs(&server("0.0.0.0", 8080)).unwrap();
        assert_eq!(addrs, vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))]);
    }

    #[test]
    fn test_ipv6_bind_address_without_brackets() {
        let addrs = listen_addrs(&server("::", 8080)).unwrap();
        assert_eq!(addrs, vec![SocketAddr::from((Ipv6Addr::UNSPECIFIED, 8080))]);

        let addrs = listen_addrs(&server("::1", 9000)).unwrap();
        assert_eq!(addrs, vec![SocketAddr::from((Ipv6Addr::LOCALHOST, 9000))]);
    }
}
