//! Markup escaping for text relayed to browsers.
//!
//! Clients render message bodies as raw HTML, so every free-text field is
//! escaped here before it leaves the gateway. Each character of the escape
//! set maps to exactly one entity and the input is walked once, so an
//! entity produced for `&` is never escaped a second time.

/// Entity for a character in the escape set, `None` for anything else.
fn entity(c: char) -> Option<&'static str> {
    Some(match c {
        '&' => "&amp;",
        '=' => "&#61;",
        '<' => "&lt;",
        '>' => "&gt;",
        '[' => "&#91;",
        ']' => "&#93;",
        '{' => "&#123;",
        '}' => "&#125;",
        '"' => "&#34;",
        '\'' => "&#39;",
        '(' => "&#40;",
        ')' => "&#41;",
        '/' => "&#47;",
        '\\' => "&#92;",
        '%' => "&#37;",
        ':' => "&#58;",
        _ => return None,
    })
}

/// Escape `input` for inclusion in HTML.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match entity(c) {
            Some(escaped) => out.push_str(escaped),
            None => out.push(c),
        }
    }
    out
}
