use anyhow::{Result, anyhow};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};

use crate::mail::imap_client::MailFetcher;
use crate::mail::smtp_client::MailSender;
use crate::web::handlers::App;
use crate::web::{WebError, WebRequest, WebResponse};

/// Uploads beyond this are refused before reaching a handler.
const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

/// Consecutive accept errors after which the listener is given up on.
const MAX_RECV_ERRORS: u32 = 10;

#[derive(Debug, Default)]
struct ListenerHealth {
    consecutive_errors: u32,
}

impl ListenerHealth {
    /// `false` once `MAX_RECV_ERRORS` errors have happened in a row.
    fn record_error(&mut self) -> bool {
        self.consecutive_errors += 1;
        self.consecutive_errors < MAX_RECV_ERRORS
    }

    fn record_ok(&mut self) {
        self.consecutive_errors = 0;
    }
}

/// Serve one request at a time until Ctrl-C.
pub fn serve<S: MailSender, F: MailFetcher>(app: &App<S, F>, bind: &str) -> Result<()> {
    let server =
        Server::http(bind).map_err(|e| anyhow!("Failed to bind web server on {bind}: {e}"))?;

    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    log::info!(
        "listening on http://{bind} (config: {})",
        app.store.path().display()
    );

    let mut health = ListenerHealth::default();
    while running.load(Ordering::SeqCst) {
        let maybe_request = match server.recv_timeout(Duration::from_millis(500)) {
            Ok(r) => {
                health.record_ok();
                r
            }
            Err(e) => {
                log::warn!("accepting a connection failed: {e}");
                if !health.record_error() {
                    return Err(anyhow!(
                        "web listener failed {MAX_RECV_ERRORS} times in a row, last error: {e}"
                    ));
                }
                continue;
            }
        };
        let Some(mut request) = maybe_request else {
            continue;
        };

        let resp = match read_request(&mut request) {
            Ok(req) => app.handle(&req),
            Err(e) => WebResponse::from_error(&e),
        };
        log::info!("{} {} -> {}", request.method(), request.url(), resp.status);

        if let Err(e) = request.respond(into_tiny(resp)) {
            log::warn!("could not write response: {e}");
        }
    }

    log::info!("shutting down");
    Ok(())
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn read_request(request: &mut Request) -> Result<WebRequest, WebError> {
    let path = request
        .url()
        .split_once('?')
        .map_or(request.url(), |(p, _)| p)
        .to_string();

    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|e| WebError::BadBody(e.to_string()))?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(WebError::BadBody("request body too large".into()));
    }

    Ok(WebRequest {
        method: request.method().clone(),
        path,
        content_type: header_value(request, "Content-Type"),
        cookie: header_value(request, "Cookie"),
        body,
    })
}

fn into_tiny(resp: WebResponse) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut out = Response::from_data(resp.body.into_bytes()).with_status_code(resp.status);
    for (k, v) in &resp.headers {
        match Header::from_bytes(k.as_bytes(), v.as_bytes()) {
            Ok(h) => out.add_header(h),
            Err(()) => log::warn!("dropping unencodable header {k}"),
        }
    }
    out
}
