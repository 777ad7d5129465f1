use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

const COOKIE_NAME: &str = "flash";
pub const CLEAR_COOKIE: &str = "flash=; Path=/; Max-Age=0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A one-shot status message carried across a redirect in a cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }

    pub fn to_set_cookie(&self) -> String {
        format!(
            "{COOKIE_NAME}={}.{}; Path=/; HttpOnly; SameSite=Lax",
            self.kind.as_str(),
            utf8_percent_encode(&self.message, NON_ALPHANUMERIC)
        )
    }

    /// Pick our cookie out of a `Cookie:` request header.
    pub fn from_cookie_header(header: &str) -> Option<Self> {
        let value = header
            .split(';')
            .filter_map(|kv| kv.trim().split_once('='))
            .find(|(k, _)| *k == COOKIE_NAME)
            .map(|(_, v)| v)?;
        let (kind, encoded) = value.split_once('.')?;
        let kind = match kind {
            "success" => FlashKind::Success,
            "error" => FlashKind::Error,
            _ => return None,
        };
        let message = percent_decode_str(encoded).decode_utf8_lossy().into_owned();
        Some(Self { kind, message })
    }
}
