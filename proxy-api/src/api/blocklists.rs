//! `GET`/`POST /api/blocklists`: read and transactionally replace the domain
//! blocklist (spec.md §4.12, SPEC_FULL.md §6). Administrative only -- the
//! blocklist is not consulted by the data plane's `UpstreamSelector`.

use actix_web::{web, HttpResponse};
use proxy_common::StatsCollector;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

pub async fn get_blocklists(collector: web::Data<StatsCollector>) -> Result<HttpResponse, ApiError> {
    let domains = collector.get_blocklist()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "domains": domains }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceBlocklist {
    domains: Vec<String>,
}

pub async fn post_blocklists(
    collector: web::Data<StatsCollector>,
    body: web::Json<ReplaceBlocklist>,
) -> Result<HttpResponse, ApiError> {
    let domains = collector.replace_blocklist(&body.domains)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "domains": domains }
    })))
}
