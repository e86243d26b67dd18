//! Logging setup for the data plane.
//!
//! A minimalist single-line format, targeting either stderr (default) or a
//! buffered rotating-by-append file writer when `log_path` is set in config.
//! The WebSocket log broadcaster that would consume these lines is an
//! external collaborator (spec.md §1); this sink only needs to stay pluggable.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Initializes `env_logger` with a `[{timestamp}] {level} [{module}] {message}`
/// format. Falls back to stderr if `log_path` is absent or the file can't be opened.
pub fn init(log_path: Option<&str>) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&filter);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {} [{}] {}",
            buf.timestamp(),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    match log_path {
        Some(dir) if !dir.is_empty() => match open_log_file(dir) {
            Ok(file) => {
                let writer = BufWriter::with_capacity(64 * 1024, file);
                builder.target(env_logger::Target::Pipe(Box::new(writer)));
                builder.init();
                log::info!("file logging initialized at {}", dir);
            }
            Err(e) => {
                builder.init();
                log::warn!("failed to open log_path '{}': {}; logging to stderr", dir, e);
            }
        },
        _ => {
            builder.init();
        }
    }
}

fn open_log_file(dir: &str) -> std::io::Result<fs::File> {
    let path = Path::new(dir);
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.join("proxy-core.log"))
}

/// Emits a `[PXY] |ID:.., CONN:.., STATUS:.., SIZE:.., COMMENT:..|` tag line
/// for a terminal connection event, so operators grepping logs get a
/// consistent, greppable shape across every outcome.
pub fn log_terminal(
    request_id: &str,
    conn_type: &str,
    status: &str,
    bytes_up: u64,
    bytes_down: u64,
    comment: &str,
) {
    log::info!(
        "[PXY] |ID:{}, CONN:{}, STATUS:{}, SIZE:{}/{}, COMMENT:{} |",
        request_id,
        conn_type,
        status,
        bytes_up,
        bytes_down,
        comment
    );
}
