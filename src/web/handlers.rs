use percent_encoding::percent_decode_str;
use tiny_http::Method;

use crate::config::{Config, ConfigStore, ServerCredential};
use crate::domain::email::{Attachment, BodyFormat, EmailDetail, EmailId, OutgoingMessage};
use crate::mail::compose::render_bodies;
use crate::mail::imap_client::MailFetcher;
use crate::mail::smtp_client::MailSender;
use crate::web::flash::{CLEAR_COOKIE, Flash};
use crate::web::forms::Form;
use crate::web::{WebError, WebRequest, WebResponse, pages};

/// Everything a request handler can touch. The config file is reached only
/// through `store`; mail goes out through `sender` and comes in through `fetcher`.
pub struct App<S, F> {
    pub store: ConfigStore,
    pub sender: S,
    pub fetcher: F,
}

impl<S: MailSender, F: MailFetcher> App<S, F> {
    pub fn new(store: ConfigStore, sender: S, fetcher: F) -> Self {
        Self {
            store,
            sender,
            fetcher,
        }
    }

    pub fn handle(&self, req: &WebRequest) -> WebResponse {
        match self.route(req) {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("{:?} {}: {e}", req.method, req.path);
                WebResponse::from_error(&e)
            }
        }
    }

    fn route(&self, req: &WebRequest) -> Result<WebResponse, WebError> {
        let segments: Vec<String> = req
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let flash = req.flash();
        let flash = flash.as_ref();

        let resp = match (&req.method, segments.as_slice()) {
            (Method::Get, []) => WebResponse::html(pages::index(flash)),
            (Method::Get, ["send"]) => {
                WebResponse::html(pages::send_form(&self.store.load_or_default(), flash))
            }
            (Method::Post, ["send"]) => self.send(&Self::form(req)?)?,
            (Method::Get, ["fetch"]) => WebResponse::html(pages::fetch_form(
                &self.store.load_or_default(),
                None,
                None,
                flash,
            )),
            (Method::Post, ["fetch"]) => self.fetch(&Self::form(req)?, flash)?,
            (Method::Get, ["view_email", account, uid]) => self.view_email(account, uid, flash),
            (Method::Get, ["manage"]) => {
                WebResponse::html(pages::manage(&self.store.load_or_default(), flash))
            }
            (Method::Post, ["manage", "add_server"]) => self.add_server(&Self::form(req)?)?,
            (Method::Post, ["manage", "delete_server"]) => {
                self.delete_server(&Self::form(req)?)?
            }
            (Method::Post, ["manage", "add_contact"]) => self.add_contact(&Self::form(req)?)?,
            (Method::Post, ["manage", "delete_contact"]) => {
                self.delete_contact(&Self::form(req)?)?
            }
            (_, [] | ["send"] | ["fetch"] | ["manage"] | ["view_email", _, _])
            | (_, ["manage", _]) => return Err(WebError::MethodNotAllowed),
            _ => return Err(WebError::NotFound(req.path.clone())),
        };

        Ok(consume_flash(resp, flash.is_some()))
    }

    fn form(req: &WebRequest) -> Result<Form, WebError> {
        Form::parse(req.content_type.as_deref(), &req.body)
    }

    fn send(&self, form: &Form) -> Result<WebResponse, WebError> {
        let config = self.store.load_or_default();
        let sender = form.require("sender")?;
        let Some(server) = config.find_server(sender) else {
            return Ok(WebResponse::redirect(
                "/send",
                Flash::error(format!("Sending server for {sender} not found.")),
            ));
        };

        let format = BodyFormat::from_form(form.get("body_format").unwrap_or_default());
        let (plain_body, html_body) = render_bodies(form.require("body")?, format);
        let message = OutgoingMessage {
            to: form.require("to_addr")?.to_string(),
            subject: form.require("subject")?.to_string(),
            plain_body,
            html_body,
            attachments: form
                .files("attachments")
                .map(|u| Attachment {
                    filename: u.filename.clone(),
                    data: u.data.clone(),
                })
                .collect(),
            nickname: form.get("nickname").map(str::to_string),
        };

        let report = self.sender.send(server, &message);
        let flash = if report.ok {
            Flash::success(report.message)
        } else {
            Flash::error(report.message)
        };
        Ok(WebResponse::redirect("/send", flash))
    }

    fn fetch(&self, form: &Form, flash: Option<&Flash>) -> Result<WebResponse, WebError> {
        let config = self.store.load_or_default();
        let account = form.require("account")?;
        let Some(server) = config.find_server(account) else {
            return Ok(not_configured(account));
        };

        match self.fetcher.list_unseen(server) {
            Ok(emails) => Ok(WebResponse::html(pages::fetch_form(
                &config,
                Some(&emails),
                Some(account),
                flash,
            ))),
            Err(e) => {
                log::warn!("fetching unseen for {account} failed: {e:#}");
                Ok(WebResponse::redirect(
                    "/fetch",
                    Flash::error(format!("Fetching mail failed: {e:#}")),
                ))
            }
        }
    }

    fn view_email(&self, account: &str, uid: &str, flash: Option<&Flash>) -> WebResponse {
        let config = self.store.load_or_default();
        let Some(server) = config.find_server(account) else {
            return not_configured(account);
        };
        let Ok(id) = uid.parse::<EmailId>() else {
            return WebResponse::redirect(
                "/fetch",
                Flash::error(format!("'{uid}' is not a message id.")),
            );
        };

        match self.fetcher.fetch_detail(server, id) {
            Ok(detail) => WebResponse::html(pages::view_email(&detail, flash)),
            Err(e) => {
                log::warn!("reading UID {id} for {account} failed: {e:#}");
                let flash = Flash::error(format!("Reading mail failed: {e:#}"));
                WebResponse::html(pages::view_email(&EmailDetail::default(), Some(&flash)))
            }
        }
    }

    fn add_server(&self, form: &Form) -> Result<WebResponse, WebError> {
        let mut config = match self.config_for_update() {
            Ok(c) => c,
            Err(resp) => return Ok(resp),
        };
        let port_text = form.require("port")?;
        let Ok(port) = port_text.trim().parse::<u16>() else {
            return Ok(WebResponse::redirect(
                "/manage",
                Flash::error(format!("'{port_text}' is not a valid port.")),
            ));
        };
        let username = form.require("username")?.trim().to_string();
        if config.find_server(&username).is_some() {
            return Ok(WebResponse::redirect(
                "/manage",
                Flash::error(format!("A server for {username} already exists.")),
            ));
        }

        config.add_server(ServerCredential {
            host: form.require("host")?.trim().to_string(),
            port,
            username,
            password: form.require("password")?.to_string(),
            imap_host: form
                .get("imap_host")
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        });
        Ok(self.save_and_redirect(&config, "Server added."))
    }

    fn delete_server(&self, form: &Form) -> Result<WebResponse, WebError> {
        let mut config = match self.config_for_update() {
            Ok(c) => c,
            Err(resp) => return Ok(resp),
        };
        config.delete_server(form.require("username")?);
        Ok(self.save_and_redirect(&config, "Server deleted."))
    }

    fn add_contact(&self, form: &Form) -> Result<WebResponse, WebError> {
        let mut config = match self.config_for_update() {
            Ok(c) => c,
            Err(resp) => return Ok(resp),
        };
        config.add_contact(
            form.require("name")?.trim(),
            form.require("email")?.trim(),
        );
        Ok(self.save_and_redirect(&config, "Contact added."))
    }

    fn delete_contact(&self, form: &Form) -> Result<WebResponse, WebError> {
        let mut config = match self.config_for_update() {
            Ok(c) => c,
            Err(resp) => return Ok(resp),
        };
        config.delete_contact(form.require("name")?);
        Ok(self.save_and_redirect(&config, "Contact deleted."))
    }

    fn config_for_update(&self) -> Result<Config, WebResponse> {
        self.store.load_for_update().map_err(|e| {
            log::warn!("refusing to modify configuration: {e:#}");
            WebResponse::redirect(
                "/manage",
                Flash::error(format!("Configuration left unchanged: {e:#}")),
            )
        })
    }

    fn save_and_redirect(&self, config: &Config, done: &str) -> WebResponse {
        let flash = match self.store.save(config) {
            Ok(()) => Flash::success(done),
            Err(e) => {
                log::warn!("saving {} failed: {e:#}", self.store.path().display());
                Flash::error(format!("Saving configuration failed: {e:#}"))
            }
        };
        WebResponse::redirect("/manage", flash)
    }
}

fn not_configured(account: &str) -> WebResponse {
    WebResponse::redirect(
        "/fetch",
        Flash::error(format!("Mailbox for {account} not found.")),
    )
}

/// A page that displayed the flash clears the cookie; redirects set their own.
fn consume_flash(mut resp: WebResponse, had_flash: bool) -> WebResponse {
    if had_flash && resp.status == 200 {
        resp.headers
            .push(("Set-Cookie".to_string(), CLEAR_COOKIE.to_string()));
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::email::EmailSummary;
    use crate::mail::smtp_client::SendReport;
    use anyhow::{Result, anyhow};
    use std::cell::RefCell;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeSender {
        sent: RefCell<Vec<(String, OutgoingMessage)>>,
        fail: bool,
    }

    impl MailSender for FakeSender {
        fn send(&self, server: &ServerCredential, message: &OutgoingMessage) -> SendReport {
            self.sent
                .borrow_mut()
                .push((server.username.clone(), message.clone()));
            SendReport {
                ok: !self.fail,
                message: if self.fail {
                    "Sending failed, error: 535 auth".to_string()
                } else {
                    format!("Sent from {} successfully!", server.username)
                },
            }
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        calls: RefCell<usize>,
        fail: bool,
    }

    impl MailFetcher for FakeFetcher {
        fn list_unseen(&self, _server: &ServerCredential) -> Result<Vec<EmailSummary>> {
            *self.calls.borrow_mut() += 1;
            if self.fail {
                return Err(anyhow!("connection refused"));
            }
            Ok(vec![EmailSummary {
                id: 42,
                from: "x@example.com".into(),
                subject: "<b>Hello</b>".into(),
                date: "today".into(),
            }])
        }

        fn fetch_detail(&self, _server: &ServerCredential, id: EmailId) -> Result<EmailDetail> {
            *self.calls.borrow_mut() += 1;
            if self.fail {
                return Err(anyhow!("timed out"));
            }
            Ok(EmailDetail {
                subject: format!("message {id}"),
                body: "<p>sanitized</p>".into(),
                ..Default::default()
            })
        }
    }

    fn app_with(sender: FakeSender, fetcher: FakeFetcher) -> (App<FakeSender, FakeFetcher>, TempDir) {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let mut cfg = Config::default();
        cfg.add_server(ServerCredential {
            host: "smtp.example.com".into(),
            port: 587,
            username: "me@example.com".into(),
            password: "pw".into(),
            imap_host: None,
        });
        store.save(&cfg).unwrap();
        (App::new(store, sender, fetcher), dir)
    }

    fn app() -> (App<FakeSender, FakeFetcher>, TempDir) {
        app_with(FakeSender::default(), FakeFetcher::default())
    }

    fn flash_of(resp: &WebResponse) -> Flash {
        let cookie = resp.header("Set-Cookie").unwrap();
        Flash::from_cookie_header(cookie.split(';').next().unwrap()).unwrap()
    }

    #[test]
    fn test_send_with_unknown_account_is_not_found_and_sends_nothing() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form(
            "/send",
            &[
                ("sender", "nobody@example.com"),
                ("to_addr", "a@example.com"),
                ("subject", "s"),
                ("body", "b"),
                ("body_format", "plain"),
            ],
        ));
        assert_eq!(resp.status, 303);
        assert_eq!(resp.header("Location"), Some("/send"));
        let flash = flash_of(&resp);
        assert_eq!(flash.kind, crate::web::flash::FlashKind::Error);
        assert_eq!(flash.message, "Sending server for nobody@example.com not found.");
        assert!(app.sender.sent.borrow().is_empty());
    }

    #[test]
    fn test_fetch_and_view_with_unknown_account_touch_no_network() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form("/fetch", &[("account", "ghost")]));
        assert_eq!(resp.header("Location"), Some("/fetch"));
        assert_eq!(flash_of(&resp).message, "Mailbox for ghost not found.");

        let resp = app.handle(&WebRequest::get("/view_email/ghost/1"));
        assert_eq!(resp.status, 303);
        assert_eq!(*app.fetcher.calls.borrow(), 0);
    }

    #[test]
    fn test_send_plain_body_redirects_with_success() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form(
            "/send",
            &[
                ("sender", "me@example.com"),
                ("nickname", "Me"),
                ("to_addr", "a@example.com,b@example.com"),
                ("subject", "Hi"),
                ("body", "hello\r\nworld"),
                ("body_format", "plain"),
            ],
        ));
        assert_eq!(resp.status, 303);
        assert_eq!(flash_of(&resp), Flash::success("Sent from me@example.com successfully!"));

        let sent = app.sender.sent.borrow();
        let (user, msg) = &sent[0];
        assert_eq!(user, "me@example.com");
        assert_eq!(msg.html_body, "<p>hello<br>world</p>");
        assert_eq!(msg.to, "a@example.com,b@example.com");
        assert_eq!(msg.nickname.as_deref(), Some("Me"));
    }

    #[test]
    fn test_send_failure_becomes_error_flash() {
        let sender = FakeSender {
            fail: true,
            ..Default::default()
        };
        let (app, _dir) = app_with(sender, FakeFetcher::default());
        let resp = app.handle(&WebRequest::post_form(
            "/send",
            &[
                ("sender", "me@example.com"),
                ("to_addr", "a@example.com"),
                ("subject", "Hi"),
                ("body", "x"),
                ("body_format", "markdown"),
            ],
        ));
        let flash = flash_of(&resp);
        assert_eq!(flash.kind, crate::web::flash::FlashKind::Error);
        assert!(flash.message.contains("535"));
    }

    #[test]
    fn test_send_missing_field_is_bad_request() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form("/send", &[("sender", "me@example.com")]));
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn test_fetch_lists_escaped_summaries() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form("/fetch", &[("account", "me@example.com")]));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("/view_email/me%40example%2Ecom/42"));
        assert!(!resp.body.contains("<b>Hello</b>"));
        assert_eq!(*app.fetcher.calls.borrow(), 1);
    }

    #[test]
    fn test_fetch_failure_redirects_with_error() {
        let fetcher = FakeFetcher {
            fail: true,
            ..Default::default()
        };
        let (app, _dir) = app_with(FakeSender::default(), fetcher);
        let resp = app.handle(&WebRequest::post_form("/fetch", &[("account", "me@example.com")]));
        assert_eq!(resp.status, 303);
        assert!(flash_of(&resp).message.contains("connection refused"));
    }

    #[test]
    fn test_view_email_decodes_path_and_renders_body() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::get("/view_email/me%40example.com/7"));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("message 7"));
        assert!(resp.body.contains("<p>sanitized</p>"));
    }

    #[test]
    fn test_view_email_failure_shows_empty_page_with_error() {
        let fetcher = FakeFetcher {
            fail: true,
            ..Default::default()
        };
        let (app, _dir) = app_with(FakeSender::default(), fetcher);
        let resp = app.handle(&WebRequest::get("/view_email/me@example.com/7"));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("timed out"));
        assert!(resp.body.contains("(no subject)"));
    }

    #[test]
    fn test_manage_crud_round_trip() {
        let (app, _dir) = app();

        let resp = app.handle(&WebRequest::post_form(
            "/manage/add_server",
            &[
                ("host", "smtp.other.com"),
                ("port", "465"),
                ("username", "other@example.com"),
                ("password", "pw"),
                ("imap_host", ""),
            ],
        ));
        assert_eq!(resp.header("Location"), Some("/manage"));
        let cfg = app.store.load().unwrap();
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[1].port, 465);
        assert_eq!(cfg.servers[1].imap_host, None);

        app.handle(&WebRequest::post_form(
            "/manage/add_contact",
            &[("name", "Ann"), ("email", "ann@example.com")],
        ));
        assert_eq!(
            app.store.load().unwrap().contacts.get("Ann").map(String::as_str),
            Some("ann@example.com")
        );

        app.handle(&WebRequest::post_form("/manage/delete_contact", &[("name", "Ann")]));
        app.handle(&WebRequest::post_form(
            "/manage/delete_server",
            &[("username", "me@example.com")],
        ));
        let cfg = app.store.load().unwrap();
        assert!(cfg.contacts.is_empty());
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].username, "other@example.com");
    }

    #[test]
    fn test_add_server_rejects_bad_port_and_duplicates() {
        let (app, _dir) = app();
        let resp = app.handle(&WebRequest::post_form(
            "/manage/add_server",
            &[("host", "h"), ("port", "abc"), ("username", "u"), ("password", "p")],
        ));
        assert_eq!(flash_of(&resp).kind, crate::web::flash::FlashKind::Error);

        let resp = app.handle(&WebRequest::post_form(
            "/manage/add_server",
            &[("host", "h"), ("port", "25"), ("username", "me@example.com"), ("password", "p")],
        ));
        assert!(flash_of(&resp).message.contains("already exists"));
        assert_eq!(app.store.load().unwrap().servers.len(), 1);
    }

    #[test]
    fn test_mutation_without_config_file_starts_empty() {
        let dir = tempdir().unwrap();
        let app = App::new(
            ConfigStore::new(dir.path().join("missing.json")),
            FakeSender::default(),
            FakeFetcher::default(),
        );
        app.handle(&WebRequest::post_form(
            "/manage/add_contact",
            &[("name", "Bo"), ("email", "bo@example.com")],
        ));
        assert_eq!(app.store.load().unwrap().contacts.len(), 1);
    }

    #[test]
    fn test_mutation_leaves_unparsable_config_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ \"smtp_servers\": [ oops").unwrap();
        let app = App::new(
            ConfigStore::new(&path),
            FakeSender::default(),
            FakeFetcher::default(),
        );
        for (route, fields) in [
            ("/manage/add_contact", &[("name", "Bo"), ("email", "bo@example.com")][..]),
            ("/manage/delete_contact", &[("name", "Bo")][..]),
            ("/manage/delete_server", &[("username", "me@example.com")][..]),
            (
                "/manage/add_server",
                &[("host", "h"), ("port", "25"), ("username", "u"), ("password", "p")][..],
            ),
        ] {
            let resp = app.handle(&WebRequest::post_form(route, fields));
            assert_eq!(resp.header("Location"), Some("/manage"));
            let flash = flash_of(&resp);
            assert_eq!(flash.kind, crate::web::flash::FlashKind::Error);
            assert!(flash.message.contains("left unchanged"));
        }
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{ \"smtp_servers\": [ oops"
        );
    }

    #[test]
    fn test_flash_is_shown_once_then_cleared() {
        let (app, _dir) = app();
        let mut req = WebRequest::get("/manage");
        req.cookie = Some(Flash::success("Contact added.").to_set_cookie());
        let resp = app.handle(&req);
        assert!(resp.body.contains("Contact added."));
        assert_eq!(resp.header("Set-Cookie"), Some(CLEAR_COOKIE));
    }

    #[test]
    fn test_unknown_route_and_wrong_method() {
        let (app, _dir) = app();
        assert_eq!(app.handle(&WebRequest::get("/nope")).status, 404);
        assert_eq!(app.handle(&WebRequest::get("/manage/add_server")).status, 405);
        assert_eq!(
            app.handle(&WebRequest::post_form("/view_email/a/1", &[])).status,
            405
        );
    }
}
