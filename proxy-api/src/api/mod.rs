//! REST surface for the control plane: stats, active connections, and the
//! domain blocklist (spec.md §6), plus stub routes for the two named external
//! collaborators (`/about`, `/logs/stream`).

pub mod about;
pub mod blocklists;
pub mod logs;
pub mod stats;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/stats", web::get().to(stats::get_stats))
            .route("/stats/active", web::get().to(stats::get_active))
            .route("/blocklists", web::get().to(blocklists::get_blocklists))
            .route("/blocklists", web::post().to(blocklists::post_blocklists))
            .route("/about", web::get().to(about::get_about))
            .route("/logs/stream", web::get().to(logs::stream_logs)),
    );
}
