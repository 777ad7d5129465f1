//! Server-rendered pages. Everything user-controlled is escaped with `html_escape`;
//! the only markup passed through is an already sanitized message body.

use html_escape::{encode_double_quoted_attribute as attr, encode_safe as esc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt::Write as _;

use crate::config::Config;
use crate::domain::email::{EmailDetail, EmailSummary};
use crate::web::flash::Flash;

fn layout(title: &str, flash: Option<&Flash>, content: &str) -> String {
    let flash_html = flash
        .map(|f| {
            format!(
                r#"<div class="flash {}">{}</div>"#,
                f.kind.as_str(),
                esc(&f.message)
            )
        })
        .unwrap_or_default();
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 60em; margin: 1em auto; }}
.flash {{ padding: .5em; margin-bottom: 1em; }}
.flash.success {{ background: #e6ffe6; }}
.flash.error {{ background: #ffe6e6; }}
table.list td, table.list th {{ padding: .2em .6em; text-align: left; }}
</style></head>
<body>
<nav><a href="/">Home</a> | <a href="/send">Send</a> | <a href="/fetch">Fetch</a> | <a href="/manage">Manage</a></nav>
<h1>{title}</h1>
{flash_html}
{content}
</body>
</html>
"#,
        title = esc(title),
    )
}

fn account_options(config: &Config, selected: Option<&str>) -> String {
    let mut out = String::new();
    for s in &config.servers {
        let sel = if selected == Some(s.username.as_str()) {
            " selected"
        } else {
            ""
        };
        let _ = write!(
            out,
            r#"<option value="{}"{sel}>{}</option>"#,
            attr(&s.username),
            esc(&s.username)
        );
    }
    out
}

pub fn index(flash: Option<&Flash>) -> String {
    layout(
        "Web Mail",
        flash,
        r#"<ul>
<li><a href="/send">Compose and send</a></li>
<li><a href="/fetch">Read unseen mail</a></li>
<li><a href="/manage">Manage servers and contacts</a></li>
</ul>"#,
    )
}

pub fn send_form(config: &Config, flash: Option<&Flash>) -> String {
    let mut contacts = String::new();
    for (name, email) in &config.contacts {
        let _ = write!(
            contacts,
            r#"<option value="{}">{}</option>"#,
            attr(email),
            esc(name)
        );
    }
    let content = format!(
        r#"<form method="post" action="/send" enctype="multipart/form-data">
<p><label>From <select name="sender">{accounts}</select></label>
<label>Nickname <input name="nickname"></label></p>
<p><label>To <input name="to_addr" list="contacts" size="60" required></label>
<datalist id="contacts">{contacts}</datalist></p>
<p><label>Subject <input name="subject" size="60"></label></p>
<p>Format:
<label><input type="radio" name="body_format" value="markdown" checked> Markdown</label>
<label><input type="radio" name="body_format" value="plain"> Plain text</label>
<label><input type="radio" name="body_format" value="html"> HTML</label></p>
<p><textarea name="body" rows="16" cols="80"></textarea></p>
<p><input type="file" name="attachments" multiple></p>
<p><button type="submit">Send</button></p>
</form>"#,
        accounts = account_options(config, None),
    );
    layout("Send Email", flash, &content)
}

pub fn fetch_form(
    config: &Config,
    emails: Option<&[EmailSummary]>,
    account: Option<&str>,
    flash: Option<&Flash>,
) -> String {
    let mut content = format!(
        r#"<form method="post" action="/fetch">
<label>Account <select name="account">{}</select></label>
<button type="submit">Fetch unseen</button>
</form>"#,
        account_options(config, account)
    );

    if let Some(emails) = emails {
        if emails.is_empty() {
            content.push_str("<p>No unseen messages.</p>");
        } else {
            let account = account.unwrap_or_default();
            content.push_str(
                r#"<table class="list"><tr><th>From</th><th>Subject</th><th>Date</th></tr>"#,
            );
            for e in emails {
                let _ = write!(
                    content,
                    r#"<tr><td>{}</td><td><a href="/view_email/{}/{}">{}</a></td><td>{}</td></tr>"#,
                    esc(&e.from),
                    utf8_percent_encode(account, NON_ALPHANUMERIC),
                    e.id,
                    esc(&e.subject),
                    esc(&e.date)
                );
            }
            content.push_str("</table>");
        }
    }
    layout("Fetch Email", flash, &content)
}

pub fn view_email(email: &EmailDetail, flash: Option<&Flash>) -> String {
    let content = format!(
        r#"<table class="list">
<tr><th>From</th><td>{}</td></tr>
<tr><th>To</th><td>{}</td></tr>
<tr><th>Date</th><td>{}</td></tr>
</table>
<hr>
<div class="body">{}</div>
<p><a href="/fetch">Back</a></p>"#,
        esc(&email.from),
        esc(&email.to),
        esc(&email.date),
        email.body
    );
    let title = if email.subject.is_empty() {
        "(no subject)"
    } else {
        email.subject.as_str()
    };
    layout(title, flash, &content)
}

pub fn manage(config: &Config, flash: Option<&Flash>) -> String {
    let mut content = String::from(
        r#"<h2>Servers</h2><table class="list"><tr><th>Host</th><th>Port</th><th>Username</th><th>IMAP host</th><th></th></tr>"#,
    );
    for s in &config.servers {
        let _ = write!(
            content,
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><form method="post" action="/manage/delete_server"><input type="hidden" name="username" value="{}"><button>Delete</button></form></td></tr>"#,
            esc(&s.host),
            s.port,
            esc(&s.username),
            esc(s.imap_host()),
            attr(&s.username)
        );
    }
    content.push_str(
        r#"</table>
<form method="post" action="/manage/add_server">
<input name="host" placeholder="smtp.example.com" required>
<input name="port" placeholder="587" size="5" required>
<input name="username" placeholder="you@example.com" required>
<input name="password" type="password" placeholder="password" required>
<input name="imap_host" placeholder="IMAP host (optional)">
<button type="submit">Add server</button>
</form>
<h2>Contacts</h2><table class="list"><tr><th>Name</th><th>Email</th><th></th></tr>"#,
    );
    for (name, email) in &config.contacts {
        let _ = write!(
            content,
            r#"<tr><td>{}</td><td>{}</td><td><form method="post" action="/manage/delete_contact"><input type="hidden" name="name" value="{}"><button>Delete</button></form></td></tr>"#,
            esc(name),
            esc(email),
            attr(name)
        );
    }
    content.push_str(
        r#"</table>
<form method="post" action="/manage/add_contact">
<input name="name" placeholder="Name" required>
<input name="email" placeholder="name@example.com" required>
<button type="submit">Add contact</button>
</form>"#,
    );
    layout("Manage", flash, &content)
}
