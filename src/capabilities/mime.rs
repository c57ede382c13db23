//! MIME classification for resource bodies

use std::path::Path;

pub const DEFAULT_MIME_TYPE: &str = "text/plain";

const TEXTUAL_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-javascript",
    "application/ecmascript",
    "application/x-ecmascript",
    "application/typescript",
    "application/x-typescript",
    "application/x-sh",
    "application/x-shellscript",
    "application/x-python",
    "application/x-c",
    "application/x-cpp",
    "application/x-c++",
    "application/x-csharp",
    "application/x-java",
    "application/x-html",
    "application/x-css",
    "application/x-sql",
    "application/x-yaml",
    "application/x-toml",
    "application/x-markdown",
    "application/x-svg+xml",
    "application/x-json",
    "application/x-ld+json",
    "application/x-jsonld",
    "application/x-rtf",
    "application/x-rtfd",
    "application/x-tex",
    "application/x-latex",
    "application/x-postscript",
    "application/x-ps",
    "application/x-eps",
];

/// Text bodies are sent as `text`, everything else as a base64 `blob`.
pub fn is_text_mime_type(mime_type: &str) -> bool {
    let normalized = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    normalized.starts_with("text/") || TEXTUAL_APPLICATION_TYPES.contains(&normalized.as_str())
}

/// Guesses a MIME type from a file extension, falling back to `text/plain`.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt" | "log" | "text") => "text/plain",
        Some("md" | "markdown") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("rs") => "text/x-rust",
        Some("c" | "h") => "text/x-c",
        Some("cpp" | "cc" | "cxx" | "hpp") => "text/x-c++",
        Some("java") => "text/x-java",
        Some("js" | "mjs") => "application/javascript",
        Some("ts") => "application/typescript",
        Some("json") => "application/json",
        Some("jsonld") => "application/x-ld+json",
        Some("xml") => "application/xml",
        Some("yaml" | "yml") => "application/x-yaml",
        Some("toml") => "application/x-toml",
        Some("sh" | "bash") => "application/x-sh",
        Some("py") => "application/x-python",
        Some("sql") => "application/x-sql",
        Some("tex") => "application/x-tex",
        Some("rtf") => "application/x-rtf",
        Some("ps") => "application/x-postscript",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("wasm") => "application/wasm",
        Some("bin" | "exe" | "dll" | "so") => "application/octet-stream",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prefix_and_known_application_types_are_text() {
        assert!(is_text_mime_type("text/plain"));
        assert!(is_text_mime_type("text/x-rust"));
        assert!(is_text_mime_type("application/json"));
        assert!(is_text_mime_type("Application/JSON; charset=utf-8"));
        assert!(is_text_mime_type("application/x-yaml"));
    }

    #[test]
    fn binary_types_are_not_text() {
        assert!(!is_text_mime_type("image/png"));
        assert!(!is_text_mime_type("application/pdf"));
        assert!(!is_text_mime_type("application/octet-stream"));
        assert!(!is_text_mime_type(""));
    }

    #[test]
    fn extension_inference_falls_back_to_plain_text() {
        assert_eq!(mime_type_for_path(Path::new("/tmp/a.JSON")), "application/json");
        assert_eq!(mime_type_for_path(Path::new("/tmp/logo.png")), "image/png");
        assert_eq!(mime_type_for_path(Path::new("/tmp/README")), "text/plain");
        assert_eq!(mime_type_for_path(Path::new("/tmp/data.unknown")), "text/plain");
    }
}
