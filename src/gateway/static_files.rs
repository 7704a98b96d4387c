//! `GET` handling: extension-less redirects and files under the web root.

use std::path::Path;

use super::response::{not_found_response, ok_response, redirect_response};

/// Content type for files whose extension is not in [`MIME_TYPES`].
pub const DEFAULT_MIME: &str = "text/plain";

/// Extension (without dot) to content type.
const MIME_TYPES: &[(&str, &str)] = &[
    ("aac", "audio/aac"),
    ("abw", "application/x-abiword"),
    ("avi", "video/x-msvideo"),
    ("bin", "application/octet-stream"),
    ("bmp", "image/bmp"),
    ("bz", "application/x-bzip"),
    ("bz2", "application/x-bzip2"),
    ("cda", "application/x-cdf"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("epub", "application/epub+zip"),
    ("gz", "application/gzip"),
    ("gif", "image/gif"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("jar", "application/java-archive"),
    ("jpeg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("mid", "audio/x-midi"),
    ("midi", "audio/x-midi"),
    ("mjs", "text/javascript"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("mpeg", "video/mpeg"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("oga", "audio/ogg"),
    ("ogv", "video/ogg"),
    ("ogx", "application/ogg"),
    ("otf", "font/otf"),
    ("png", "image/png"),
    ("pdf", "application/pdf"),
    ("php", "application/x-httpd-php"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("rar", "application/vnd.rar"),
    ("rtf", "application/rtf"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("ttf", "font/ttf"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("xhtml", "application/xhtml+xml"),
    ("xls", "application/vnd.ms-excel"),
    ("xml", "application/xml"),
    ("xul", "application/vnd.mozilla.xul+xml"),
    ("zip", "application/zip"),
    ("7z", "application/x-7z-compressed"),
];

/// Looks up the content type for a file extension.
pub fn mime_type(extension: &str) -> &'static str {
    let ext = extension.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map_or(DEFAULT_MIME, |(_, mime)| *mime)
}

/// Answers `GET <target>` against `web_root`.
///
/// Targets without an extension are redirected to their `index.html`, keeping
/// any query suffix. Targets that are missing or that resolve outside
/// `web_root` get `404`.
pub async fn serve_get(web_root: &Path, target: &str) -> Vec<u8> {
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };

    let Some(extension) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        let mut location = format!("{}/index.html", path.trim_end_matches('/'));
        if let Some(q) = query {
            location.push('?');
            location.push_str(q);
        }
        return redirect_response(&location);
    };

    let Ok(root) = tokio::fs::canonicalize(web_root).await else {
        tracing::warn!(root = %web_root.display(), "Web root is not accessible");
        return not_found_response();
    };
    let Ok(file) = tokio::fs::canonicalize(root.join(path.trim_start_matches('/'))).await else {
        return not_found_response();
    };
    if !file.starts_with(&root) || !file.is_file() {
        return not_found_response();
    }

    match tokio::fs::read(&file).await {
        Ok(body) => ok_response(mime_type(extension), &body),
        Err(e) => {
            tracing::warn!(file = %file.display(), "Static file read failed: {e}");
            not_found_response()
        }
    }
}
