//! `GET /api/about`: README rendering is an external collaborator (spec.md
//! §1); the route exists so the surface is complete, but returns `501`.

use actix_web::HttpResponse;
use serde_json::json;

pub async fn get_about() -> HttpResponse {
    HttpResponse::NotImplemented().json(json!({
        "success": false,
        "error": "about/readme rendering is not implemented",
    }))
}
