//! The control-plane binary: a read-mostly JSON API over the same SQLite
//! file `proxy-core` writes to, plus the transactional blocklist-replace
//! endpoint. Never dials sockets and never sees live traffic (SPEC_FULL.md §2).

mod api;
mod error;

use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use proxy_common::{Config, Database, StatsCollector};

#[derive(Parser, Debug)]
#[command(name = "proxy-api", about = "Forward proxy stats/control plane API")]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("fatal: failed to load config {:?}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    let database = match Database::new(&config.sqlite_path) {
        Ok(db) => std::sync::Arc::new(db),
        Err(e) => {
            log::error!("fatal: failed to open database '{}': {}", config.sqlite_path, e);
            std::process::exit(1);
        }
    };
    let collector = match StatsCollector::new(database, config.enable_database) {
        Ok(c) => web::Data::new(c),
        Err(e) => {
            log::error!("fatal: failed to initialize stats collector: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("proxy-api listening on {}", config.http_addr);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(collector.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(api::configure)
    })
    .bind(&config.http_addr)?
    .workers(2)
    .run()
    .await
}
