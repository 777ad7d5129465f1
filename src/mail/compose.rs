use anyhow::{Result, anyhow};
use lettre::{Address, Message};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment as AttachmentPart, Body, Mailbox, MultiPart};
use pulldown_cmark::{Options, Parser, html};

use crate::domain::email::{BodyFormat, OutgoingMessage};

pub const HTML_ONLY_NOTICE: &str =
    "(This message is formatted as HTML. Please view it in an HTML-capable mail client.)";

/// Turn the raw compose body into `(plain, html)` alternatives.
pub fn render_bodies(raw: &str, format: BodyFormat) -> (String, String) {
    let raw = raw.replace("\r\n", "\n");
    match format {
        BodyFormat::Plain => {
            let html = format!("<p>{}</p>", raw.replace('\n', "<br>"));
            (raw, html)
        }
        BodyFormat::Html => (HTML_ONLY_NOTICE.to_string(), raw),
        BodyFormat::Markdown => {
            let html = markdown_to_html(&raw);
            (raw, html)
        }
    }
}

fn markdown_to_html(src: &str) -> String {
    // fenced code blocks are part of CommonMark; tables are an extension
    let parser = Parser::new_ext(src, Options::ENABLE_TABLES);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// `"Nick <user>"` when a non-blank nickname is given, else the bare username.
pub fn from_mailbox(username: &str, nickname: Option<&str>) -> Result<Mailbox> {
    let address = username
        .parse::<Address>()
        .map_err(|e| anyhow!("invalid sender address '{username}': {e}"))?;
    let name = nickname
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    Ok(Mailbox::new(name, address))
}

pub fn recipients(to: &str) -> Result<Vec<Mailbox>> {
    let list = to
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Mailbox>()
                .map_err(|e| anyhow!("invalid recipient '{s}': {e}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if list.is_empty() {
        return Err(anyhow!("no recipient given"));
    }
    Ok(list)
}

/// multipart/mixed: one multipart/alternative (plain + html) followed by each
/// attachment as base64 application/octet-stream.
pub fn build_message(username: &str, msg: &OutgoingMessage) -> Result<Message> {
    let mut builder = Message::builder()
        .from(from_mailbox(username, msg.nickname.as_deref())?)
        .subject(msg.subject.clone());
    for to in recipients(&msg.to)? {
        builder = builder.to(to);
    }

    let mut mixed = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
        msg.plain_body.clone(),
        msg.html_body.clone(),
    ));

    let octet_stream = ContentType::parse("application/octet-stream")?;
    for att in &msg.attachments {
        let body = Body::new_with_encoding(att.data.clone(), ContentTransferEncoding::Base64)
            .unwrap_or_else(Body::new);
        mixed = mixed.singlepart(
            AttachmentPart::new(att.filename.clone()).body(body, octet_stream.clone()),
        );
    }

    Ok(builder.multipart(mixed)?)
}
