//! Captured photo files
//!
//! Photos are named `photo_<unix millis>.jpg` and served from `/uploads/`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::protocol::Response;

/// URL prefix photos are served under
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// One entry of `GET /api/photos`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoEntry {
    pub filename: String,
    pub path: String,
    /// Unix millis
    pub timestamp: i64,
    pub simulated: bool,
}

/// Current time in unix millis
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn photo_filename(timestamp: i64) -> String {
    format!("photo_{}.jpg", timestamp)
}

pub fn photo_url(filename: &str) -> String {
    format!("{}{}", UPLOADS_PREFIX, filename)
}

/// Plain file name with no path components
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

fn is_jpeg_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

/// Timestamp embedded in `photo_<millis>.jpg`
fn timestamp_from_name(name: &str) -> Option<i64> {
    let stem = name.strip_prefix("photo_")?;
    let digits = stem.split('.').next()?;
    digits.parse().ok()
}

/// Content type for a served file
pub fn content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// JPEG files in `dir`, newest first
///
/// Files not named after their capture time fall back to their modification
/// time. A missing directory lists as empty.
pub async fn list_photos(dir: &Path) -> Vec<PhotoEntry> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Uploads directory unreadable");
            return Vec::new();
        }
    };

    let mut photos = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if !is_jpeg_name(&filename) {
            continue;
        }

        let timestamp = match timestamp_from_name(&filename) {
            Some(ts) => ts,
            None => entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(now_millis),
        };

        photos.push(PhotoEntry {
            path: photo_url(&filename),
            filename,
            timestamp,
            simulated: false,
        });
    }

    photos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    photos
}

/// Remove one photo; `false` for unsafe names or missing files
pub async fn delete_photo(dir: &Path, name: &str) -> bool {
    if !is_safe_name(name) {
        tracing::warn!(name = name, "Refusing to delete unsafe photo name");
        return false;
    }
    match tokio::fs::remove_file(dir.join(name)).await {
        Ok(()) => {
            tracing::info!(name = name, "Photo deleted");
            true
        }
        Err(e) => {
            tracing::debug!(name = name, error = %e, "Photo delete failed");
            false
        }
    }
}

/// `GET /uploads/<name>`
pub async fn serve_upload(dir: &Path, name: &str) -> Response {
    if !is_safe_name(name) {
        return Response::json(403, &json!({ "error": "Forbidden" }));
    }

    match tokio::fs::read(dir.join(name)).await {
        Ok(data) => Response::new(200)
            .header("Content-Type", content_type(name))
            .header("Cache-Control", "max-age=3600")
            .body(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Response::json(404, &json!({ "error": "File Not Found" }))
        }
        Err(e) => {
            tracing::warn!(name = name, error = %e, "Failed to read upload");
            Response::json(500, &json!({ "error": "Internal Server Error" }))
        }
    }
}
