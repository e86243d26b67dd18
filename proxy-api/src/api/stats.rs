//! `GET /api/stats`: aggregate totals, top hosts, and paginated records over
//! the filtered `access_logs` set (spec.md §4.12, SPEC_FULL.md §6).

use actix_web::{web, HttpResponse};
use proxy_common::{ConnectionType, Pagination, StatsCollector, StatsFilter};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(rename = "startTime")]
    start_time: Option<i64>,
    #[serde(rename = "endTime")]
    end_time: Option<i64>,
    host: Option<String>,
    #[serde(rename = "type")]
    conn_type: Option<String>,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

pub async fn get_stats(
    collector: web::Data<StatsCollector>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, ApiError> {
    let conn_type = match query.conn_type.as_deref() {
        Some("HTTP") => Some(ConnectionType::Http),
        Some("HTTPS") => Some(ConnectionType::Https),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "invalid type '{}', expected HTTP or HTTPS",
                other
            )))
        }
        None => None,
    };

    let filter = StatsFilter {
        start_time: query.start_time,
        end_time: query.end_time,
        host: query.host.clone(),
        conn_type,
    };
    let pagination = Pagination::new(query.page.unwrap_or(1), query.page_size.unwrap_or(10));

    let page = collector.get_stats(&filter, pagination)?;
    let active_connections = collector.active_count()?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "totalRequests": page.totals.total_requests,
            "totalBytesUp": page.totals.total_bytes_up,
            "totalBytesDown": page.totals.total_bytes_down,
            "avgDuration": page.totals.avg_duration,
            "topHosts": page.top_hosts.iter().map(|h| json!({
                "host": h.host,
                "count": h.count,
                "sumBytes": h.sum_bytes,
            })).collect::<Vec<_>>(),
            "records": page.records,
            "pagination": {
                "page": page.pagination.page,
                "pageSize": page.pagination.page_size,
                "total": page.pagination.total,
                "totalPages": page.pagination.total_pages,
            },
            "activeConnections": active_connections,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

/// `GET /api/stats/active`.
pub async fn get_active(
    collector: web::Data<StatsCollector>,
    query: web::Query<ActiveQuery>,
) -> Result<HttpResponse, ApiError> {
    let pagination = Pagination::new(query.page.unwrap_or(1), query.page_size.unwrap_or(10));
    let page = collector.get_active(pagination)?;

    let records: Vec<_> = page
        .records
        .iter()
        .map(|c| {
            json!({
                "requestId": c.request_id,
                "startTime": c.start_time,
                "targetHost": c.target_host,
                "targetPort": c.target_port,
                "type": c.conn_type.as_str(),
                "bytesUp": c.bytes_up,
                "bytesDown": c.bytes_down,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "total": page.total,
            "records": records,
        }
    })))
}
