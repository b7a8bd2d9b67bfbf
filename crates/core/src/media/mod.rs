/// Container extensions the player accepts. Matching is case-sensitive.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "ogg", "m4a", "wav", "flac", "mp4", "mkv", "avi"];

/// Returns true for `http://` and `https://` sources.
pub fn is_supported_url(name: &str) -> bool {
    name.starts_with("http://") || name.starts_with("https://")
}

/// Returns true if `name` is a stream URL or ends in a supported extension.
///
/// A leading dot does not start an extension, so `.mp3` alone is rejected.
pub fn is_supported(name: &str) -> bool {
    if is_supported_url(name) {
        return true;
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => SUPPORTED_EXTENSIONS.contains(&&name[dot + 1..]),
        _ => false,
    }
}
