use anyhow::Result;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{SmtpTransport, Transport};
use std::time::Duration;

use crate::config::ServerCredential;
use crate::domain::email::OutgoingMessage;
use crate::mail::compose::build_message;

pub const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of a send attempt, already phrased for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub ok: bool,
    pub message: String,
}

pub trait MailSender {
    /// Never fails: every error ends up in a `SendReport` with `ok == false`.
    fn send(&self, server: &ServerCredential, message: &OutgoingMessage) -> SendReport;
}

pub struct SmtpSender;

impl SmtpSender {
    fn try_send(&self, server: &ServerCredential, message: &OutgoingMessage) -> Result<()> {
        let email = build_message(&server.username, message)?;

        let tls = TlsParameters::new(server.host.clone())?;
        let transport = SmtpTransport::builder_dangerous(server.host.as_str())
            .port(server.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(SMTP_TIMEOUT))
            .credentials(Credentials::new(
                server.username.clone(),
                server.password.clone(),
            ))
            .build();

        // without a pool, send() opens a session and QUITs it when done
        transport.send(&email)?;
        Ok(())
    }
}

impl MailSender for SmtpSender {
    fn send(&self, server: &ServerCredential, message: &OutgoingMessage) -> SendReport {
        match self.try_send(server, message) {
            Ok(()) => {
                log::info!("sent '{}' from {}", message.subject, server.username);
                SendReport {
                    ok: true,
                    message: format!("Sent from {} successfully!", server.username),
                }
            }
            Err(e) => {
                log::warn!("send from {} failed: {e:#}", server.username);
                SendReport {
                    ok: false,
                    message: format!("Sending from {} failed, error: {e:#}", server.username),
                }
            }
        }
    }
}
