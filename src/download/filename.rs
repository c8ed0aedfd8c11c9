//! Filename derivation and sanitization for downloads.
//!
//! Crawled records rarely carry filesystem-safe names, so every name that
//! reaches the disk goes through [`sanitize_filename`] first.

use std::path::{Component, Path};

use url::Url;

/// Maps a `Content-Type` header to a file extension (without the dot).
///
/// Returns `None` for unknown types so callers can leave the name untouched.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let extension = match mime.as_str() {
        "text/html" => "html",
        "text/plain" => "txt",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/x-7z-compressed" => "7z",
        "application/x-rar-compressed" | "application/vnd.rar" => "rar",
        "application/epub+zip" => "epub",
        "text/css" => "css",
        "text/javascript" | "application/javascript" => "js",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => return None,
    };
    Some(extension)
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters with `_`, and rewrites
/// names that would resolve to `.` or `..`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Filename derived from the URL's last path segment, or `download_<timestamp>`.
#[must_use]
pub fn fallback_filename_from_url(url: &Url) -> String {
    if let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.into(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("download_{timestamp}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name?.pdf"), "file_name_.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("   "), "_");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("Chapter 12 (final).mp4"), "Chapter 12 (final).mp4");
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }

    #[test]
    fn test_extension_from_content_type_strips_parameters() {
        assert_eq!(
            extension_from_content_type("text/html; charset=utf-8"),
            Some("html")
        );
        assert_eq!(extension_from_content_type("Application/PDF"), Some("pdf"));
    }

    #[test]
    fn test_extension_from_content_type_unknown_is_none() {
        assert_eq!(extension_from_content_type("application/octet-stream"), None);
        assert_eq!(extension_from_content_type(""), None);
    }

    #[test]
    fn test_fallback_filename_from_url_decodes_last_segment() {
        let url = Url::parse("https://example.com/files/My%20Movie.mp4").unwrap();
        assert_eq!(fallback_filename_from_url(&url), "My Movie.mp4");
    }

    #[test]
    fn test_fallback_filename_from_url_empty_path_uses_timestamp() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(fallback_filename_from_url(&url).starts_with("download_"));
    }
}
