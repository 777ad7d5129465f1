use ammonia::Builder;
use mailparse::ParsedMail;
use std::collections::{HashMap, HashSet};

/// Tags allowed through on top of the basic inline/list set.
const EXTRA_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "br", "hr", "pre", "code", "img", "table", "thead",
    "tbody", "tr", "td", "th",
];

const BASE_TAGS: &[&str] = &[
    "a",
    "abbr",
    "acronym",
    "b",
    "blockquote",
    "code",
    "em",
    "i",
    "li",
    "ol",
    "strong",
    "ul",
];

/// Pick the displayable body of a parsed message.
///
/// The first `text/html` part wins. Otherwise the first `text/plain` part is
/// escaped and wrapped in `<pre>`. Returns an empty string when neither exists.
/// The result is NOT sanitized yet.
pub fn extract_display_html(parsed: &ParsedMail) -> String {
    if let Some(html) = find_part(parsed, "text/html").and_then(|p| p.get_body().ok())
        && !html.is_empty()
    {
        return html;
    }
    match find_part(parsed, "text/plain").and_then(|p| p.get_body().ok()) {
        Some(plain) => format!("<pre>{}</pre>", html_escape::encode_safe(&plain)),
        None => String::new(),
    }
}

/// Depth-first, parent before children, same order a MIME walk visits parts.
fn find_part<'m, 'a>(p: &'m ParsedMail<'a>, mimetype: &str) -> Option<&'m ParsedMail<'a>> {
    if p.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
        return Some(p);
    }
    p.subparts.iter().find_map(|sp| find_part(sp, mimetype))
}

/// Strip everything not on the allow-list from untrusted HTML.
///
/// Disallowed tags are removed (their text kept), except `script` and
/// `style` which are dropped together with their content.
pub fn sanitize_html(html: &str) -> String {
    let tags: HashSet<&str> = BASE_TAGS.iter().chain(EXTRA_TAGS).copied().collect();
    let tag_attributes = HashMap::from([
        ("a", HashSet::from(["href", "title"])),
        ("img", HashSet::from(["src", "alt", "style"])),
    ]);

    Builder::default()
        .tags(tags)
        .generic_attributes(HashSet::from(["style", "class"]))
        .tag_attributes(tag_attributes)
        .url_schemes(HashSet::from(["http", "https", "mailto"]))
        .clean(html)
        .to_string()
}
