//! `WS /api/logs/stream`: the log broadcaster is an external collaborator
//! (spec.md §1). A full WebSocket upgrade needs a websocket crate not carried
//! elsewhere in this workspace, so this route is a route-surface stub: it
//! answers the upgrade request with `501`, matching `/api/about` (see
//! DESIGN.md for the scope note).

use actix_web::HttpResponse;
use serde_json::json;

pub async fn stream_logs() -> HttpResponse {
    HttpResponse::NotImplemented().json(json!({
        "success": false,
        "error": "log streaming is not implemented",
    }))
}
