/// Truncate a body for logging, adding ellipsis if truncated
pub fn truncate_body(body: &str, max_len: usize) -> String {
    let body = body.trim();
    if body.len() <= max_len {
        return body.to_string();
    }

    // Never split a UTF-8 sequence
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...[truncated, {} bytes total]", &body[..end], body.len())
}
