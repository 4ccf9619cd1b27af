//! Utility functions and helpers for upload handling

use std::path::Path;

/// Validate that a file has an allowed extension
pub(crate) fn validate_file_extension<S: AsRef<str>>(filename: &str, allowed_extensions: &[S]) -> bool {
    if let Some(ext) = Path::new(filename).extension() {
        if let Some(ext_str) = ext.to_str() {
            return allowed_extensions
                .iter()
                .any(|e| e.as_ref().eq_ignore_ascii_case(ext_str));
        }
    }
    false
}

/// Whether an upload looks like an image, by declared content type or,
/// failing that, by file name.
pub(crate) fn is_image_upload(content_type: Option<&str>, filename: &str) -> bool {
    match content_type {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.starts_with("image/"),
        _ => mime_guess::from_path(filename)
            .first()
            .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE),
    }
}

/// Strip any directory components from a client-supplied file name
pub(crate) fn display_filename(filename: &str) -> String {
    let normalized = filename.replace('\\', "/");
    normalized
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("upload")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_filename() {
        assert_eq!(display_filename("C:\\path\\to\\dress.jpg"), "dress.jpg");
        assert_eq!(display_filename("../../etc/passwd"), "passwd");
        assert_eq!(display_filename("plain.png"), "plain.png");
        assert_eq!(display_filename(""), "upload");
    }

    #[test]
    fn test_validate_file_extension() {
        let allowed = vec!["jpg", "jpeg", "png"];
        assert!(validate_file_extension("test.jpg", &allowed));
        assert!(validate_file_extension("test.JPEG", &allowed));
        assert!(!validate_file_extension("test.txt", &allowed));
        assert!(!validate_file_extension("test", &allowed));
    }

    #[test]
    fn test_is_image_upload() {
        assert!(is_image_upload(Some("image/png"), "x.bin"));
        assert!(!is_image_upload(Some("text/plain"), "x.png"));
        assert!(is_image_upload(None, "photo.jpeg"));
        assert!(is_image_upload(Some("application/octet-stream"), "photo.webp"));
        assert!(!is_image_upload(None, "notes.txt"));
    }
}
