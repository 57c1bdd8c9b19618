/// Collapses whitespace and cuts the body to `max_chars` characters.
pub fn summarize(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", collapsed[..cut].trim_end()),
        None => collapsed,
    }
}

/// First `max_chars` characters of the raw body, as sent to the classifier.
pub fn head(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}

pub fn render_reply(template: &str, sender: &str, subject: &str, summary: &str) -> String {
    template
        .replace("{sender}", sender)
        .replace("{subject}", subject)
        .replace("{summary}", summary)
}
