use mailparse::{MailHeader, MailHeaderMap};

/// Decode a raw subject value, including RFC 2047 encoded-words in any
/// declared charset. Undeclared 8-bit text is read as UTF-8 with invalid
/// bytes dropped.
pub fn decode_subject(raw: &[u8]) -> String {
    // mailparse expects a full "Key: value" header line
    let mut line = b"Subject: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((h, _idx)) => decode_value(&h),
        Err(_) => utf8_ignoring_invalid(raw),
    }
}

fn decode_value(h: &MailHeader) -> String {
    let raw = h.get_value_raw();
    if raw.is_ascii() {
        return h.get_value(); // decodes RFC 2047
    }
    h.get_value_utf8()
        .unwrap_or_else(|_| utf8_ignoring_invalid(raw))
}

pub fn utf8_ignoring_invalid(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace(char::REPLACEMENT_CHARACTER, "")
}

/// The decoded `Subject`, or empty when the message has none.
pub fn subject_of(headers: &[MailHeader]) -> String {
    headers
        .get_first_header("Subject")
        .map(|h| decode_subject(h.get_value_raw()).trim().to_string())
        .unwrap_or_default()
}

/// A header value exactly as it appears in the message (unfolded, undecoded).
pub fn raw_header(headers: &[MailHeader], name: &str) -> String {
    headers
        .get_first_header(name)
        .map(|h| utf8_ignoring_invalid(h.get_value_raw()).trim().to_string())
        .unwrap_or_default()
}
