pub mod flash;
pub mod forms;
pub mod handlers;
pub mod pages;
pub mod server;

use thiserror::Error;
use tiny_http::Method;

use crate::web::flash::Flash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebError {
    #[error("missing form field '{0}'")]
    MissingField(String),
    #[error("malformed request body: {0}")]
    BadBody(String),
    #[error("no such page: {0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl WebError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingField(_) | Self::BadBody(_) => 400,
            Self::NotFound(_) => 404,
            Self::MethodNotAllowed => 405,
        }
    }
}

/// A request with its body already read, detached from the socket.
#[derive(Debug, Clone)]
pub struct WebRequest {
    pub method: Method,
    /// Path only, query string removed.
    pub path: String,
    pub content_type: Option<String>,
    pub cookie: Option<String>,
    pub body: Vec<u8>,
}

impl WebRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            content_type: None,
            cookie: None,
            body: Vec::new(),
        }
    }

    pub fn post_form(path: impl Into<String>, pairs: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self {
            method: Method::Post,
            path: path.into(),
            content_type: Some("application/x-www-form-urlencoded".to_string()),
            cookie: None,
            body: body.into_bytes(),
        }
    }

    pub fn flash(&self) -> Option<Flash> {
        self.cookie.as_deref().and_then(Flash::from_cookie_header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WebResponse {
    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            headers: vec![(
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            body,
        }
    }

    /// Post/redirect/get: send the browser back to a GET view with a status message.
    pub fn redirect(location: &str, flash: Flash) -> Self {
        Self {
            status: 303,
            headers: vec![
                ("Location".to_string(), location.to_string()),
                ("Set-Cookie".to_string(), flash.to_set_cookie()),
            ],
            body: String::new(),
        }
    }

    pub fn from_error(err: &WebError) -> Self {
        Self {
            status: err.status(),
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: err.to_string(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
