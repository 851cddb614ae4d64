//! MIME type detection
//!
//! Content-Type from the file extension. Configured overrides win over the
//! built-in table.

use std::collections::HashMap;
use std::path::Path;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Built-in Content-Type for a lowercase extension
///
/// # Examples
/// ```
/// use devserve::http::mime::builtin_content_type;
/// assert_eq!(builtin_content_type("js"), Some("application/javascript; charset=utf-8"));
/// assert_eq!(builtin_content_type("xyz"), None);
/// ```
pub fn builtin_content_type(extension: &str) -> Option<&'static str> {
    let content_type = match extension {
        // Documents and bundles
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" | "cjs" => "application/javascript; charset=utf-8",
        "map" | "json" => "application/json; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "wasm" => "application/wasm",
        "webmanifest" => "application/manifest+json",

        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "avif" => "image/avif",

        // Media
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",

        // Fonts
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",

        _ => return None,
    };
    Some(content_type)
}

/// Content-Type for `path`, consulting `overrides` (keyed by extension,
/// without the dot) first
pub fn content_type_for(path: &str, overrides: &HashMap<String, String>) -> String {
    let Some(extension) = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
    else {
        return DEFAULT_CONTENT_TYPE.to_string();
    };

    if let Some(content_type) = overrides.get(&extension) {
        return content_type.clone();
    }
    builtin_content_type(&extension)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
