use mailparse::{MailHeader, MailHeaderMap};
use std::collections::HashMap;

use crate::web::WebError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub field: String,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Decoded form submission: text fields plus any uploaded files.
#[derive(Debug, Clone, Default)]
pub struct Form {
    fields: HashMap<String, String>,
    files: Vec<Upload>,
}

impl Form {
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, WebError> {
        let ct = mailparse::parse_content_type(content_type.unwrap_or_default());
        match ct.mimetype.as_str() {
            "multipart/form-data" => {
                let boundary = ct
                    .params
                    .get("boundary")
                    .ok_or_else(|| WebError::BadBody("multipart without boundary".into()))?;
                parse_multipart(boundary, body)
            }
            // browsers send urlencoded by default; treat a missing type the same way
            _ => Ok(Self {
                fields: url::form_urlencoded::parse(body).into_owned().collect(),
                files: Vec::new(),
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, WebError> {
        self.get(name)
            .ok_or_else(|| WebError::MissingField(name.to_string()))
    }

    /// Files uploaded under `field`, skipping inputs left empty.
    pub fn files<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Upload> + 'a {
        self.files
            .iter()
            .filter(move |u| u.field == field && !u.filename.is_empty())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_multipart(boundary: &str, body: &[u8]) -> Result<Form, WebError> {
    let malformed = || WebError::BadBody("truncated multipart body".into());
    let first = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");

    let start = find(body, first.as_bytes()).ok_or_else(malformed)?;
    let mut rest = &body[start + first.len()..];
    let mut form = Form::default();

    // each part: CRLF, headers, blank line, data, CRLF--boundary
    while !rest.starts_with(b"--") {
        rest = rest.strip_prefix(b"\r\n").ok_or_else(malformed)?;
        let end = find(rest, delimiter.as_bytes()).ok_or_else(malformed)?;
        add_part(&mut form, &rest[..end])?;
        rest = &rest[end + delimiter.len()..];
    }
    Ok(form)
}

fn header_text(h: &MailHeader) -> String {
    // filenames arrive as raw UTF-8, not RFC 2047
    h.get_value_utf8().unwrap_or_else(|_| h.get_value())
}

fn add_part(form: &mut Form, part: &[u8]) -> Result<(), WebError> {
    let (headers, body_start) =
        mailparse::parse_headers(part).map_err(|e| WebError::BadBody(e.to_string()))?;
    let Some(disposition) = headers.get_first_header("Content-Disposition") else {
        return Ok(());
    };
    let disposition = mailparse::parse_content_disposition(&header_text(disposition));
    let Some(name) = disposition.params.get("name").cloned() else {
        return Ok(());
    };
    let data = &part[body_start.min(part.len())..];

    match disposition.params.get("filename") {
        Some(filename) => form.files.push(Upload {
            field: name,
            filename: filename.clone(),
            data: data.to_vec(),
        }),
        None => {
            form.fields
                .insert(name, String::from_utf8_lossy(data).into_owned());
        }
    }
    Ok(())
}
