/// Sniffs the MIME type of an upload payload, falling back to octet-stream.
pub fn detect_mimetype(bytes: &[u8]) -> &'static str {
    match infer::get(bytes) {
        Some(k) => k.mime_type(),
        None => "application/octet-stream",
    }
}
