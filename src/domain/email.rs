pub type EmailId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSummary {
    pub id: EmailId,
    pub from: String,
    pub subject: String,
    pub date: String,
}

/// A single message ready for display. `body` is always sanitized HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailDetail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub body: String,
}

/// How the compose form's body field should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Plain,
    Html,
    Markdown,
}

impl BodyFormat {
    /// Anything other than `plain` or `html` is treated as markdown.
    pub fn from_form(value: &str) -> Self {
        match value {
            "plain" => Self::Plain,
            "html" => Self::Html,
            _ => Self::Markdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Comma separated, as typed into the form.
    pub to: String,
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    pub nickname: Option<String>,
}
