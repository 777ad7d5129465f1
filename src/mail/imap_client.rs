use crate::config::ServerCredential;
use crate::domain::email::{EmailDetail, EmailId, EmailSummary};
use crate::mail::body::{extract_display_html, sanitize_html};
use crate::mail::decoders::{raw_header, subject_of};
use anyhow::{Result, anyhow};
use native_tls::TlsConnector;
use std::io::{Read, Write};

pub const IMAPS_PORT: u16 = 993;
pub const MAX_UNSEEN: usize = 20;

/// The handful of IMAP operations the fetcher needs, on an INBOX that is
/// already selected.
pub trait MailboxSession {
    fn unseen_uids(&mut self) -> Result<Vec<EmailId>>;
    /// Full RFC 822 source. `mark_seen` decides between `RFC822` and `BODY.PEEK[]`.
    fn fetch_source(&mut self, uid: EmailId, mark_seen: bool) -> Result<Option<Vec<u8>>>;
    fn logout(&mut self) -> Result<()>;
}

impl<T: Read + Write> MailboxSession for imap::Session<T> {
    fn unseen_uids(&mut self) -> Result<Vec<EmailId>> {
        Ok(self.uid_search("UNSEEN")?.into_iter().collect())
    }

    fn fetch_source(&mut self, uid: EmailId, mark_seen: bool) -> Result<Option<Vec<u8>>> {
        let query = if mark_seen { "RFC822" } else { "BODY.PEEK[]" };
        let fetches = self.uid_fetch(uid.to_string(), query)?;
        Ok(fetches.iter().next().and_then(|f| f.body()).map(|b| b.to_vec()))
    }

    fn logout(&mut self) -> Result<()> {
        imap::Session::logout(self)?;
        Ok(())
    }
}

pub trait MailFetcher {
    fn list_unseen(&self, server: &ServerCredential) -> Result<Vec<EmailSummary>>;
    fn fetch_detail(&self, server: &ServerCredential, id: EmailId) -> Result<EmailDetail>;
}

pub struct ImapClient;

impl ImapClient {
    fn connect_and_auth(
        &self,
        server: &ServerCredential,
    ) -> Result<imap::Session<native_tls::TlsStream<std::net::TcpStream>>> {
        let host = server.imap_host();
        let tls = TlsConnector::builder().build()?;
        let client = imap::connect((host, IMAPS_PORT), host, &tls)?;
        let mut session = client
            .login(&server.username, &server.password)
            .map_err(|(e, _)| anyhow!("IMAP login as {} failed: {e}", server.username))?;
        session.select("INBOX")?;
        Ok(session)
    }
}

impl MailFetcher for ImapClient {
    fn list_unseen(&self, server: &ServerCredential) -> Result<Vec<EmailSummary>> {
        let mut session = self.connect_and_auth(server)?;
        let out = list_unseen_in(&mut session)?;
        log::info!("{}: {} unseen listed", server.username, out.len());
        Ok(out)
    }

    fn fetch_detail(&self, server: &ServerCredential, id: EmailId) -> Result<EmailDetail> {
        let mut session = self.connect_and_auth(server)?;
        fetch_detail_in(&mut session, id)
    }
}

/// The newest `MAX_UNSEEN` unseen UIDs, newest first.
pub fn most_recent(mut uids: Vec<EmailId>) -> Vec<EmailId> {
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids.truncate(MAX_UNSEEN);
    uids
}

/// Summaries of the newest unseen messages. Logs out only after a clean run;
/// on error the session is simply dropped.
pub fn list_unseen_in(session: &mut impl MailboxSession) -> Result<Vec<EmailSummary>> {
    let uids = session.unseen_uids()?;
    if uids.is_empty() {
        session.logout()?;
        return Ok(vec![]);
    }

    let mut out = Vec::with_capacity(MAX_UNSEEN);
    for uid in most_recent(uids) {
        let Some(raw) = session.fetch_source(uid, false)? else {
            log::warn!("UID {uid} returned no body; skipping");
            continue;
        };
        let (headers, _) = mailparse::parse_headers(&raw)?;
        out.push(EmailSummary {
            id: uid,
            from: raw_header(&headers, "From"),
            subject: subject_of(&headers),
            date: raw_header(&headers, "Date"),
        });
    }
    session.logout()?;
    Ok(out)
}

pub fn fetch_detail_in(session: &mut impl MailboxSession, id: EmailId) -> Result<EmailDetail> {
    let raw = session
        .fetch_source(id, true)?
        .ok_or_else(|| anyhow!("email UID {id} not found"))?;
    let detail = detail_from_source(&raw)?;
    session.logout()?;
    Ok(detail)
}

pub fn detail_from_source(raw: &[u8]) -> Result<EmailDetail> {
    let parsed = mailparse::parse_mail(raw)?;
    Ok(EmailDetail {
        from: raw_header(&parsed.headers, "From"),
        to: raw_header(&parsed.headers, "To"),
        subject: subject_of(&parsed.headers),
        date: raw_header(&parsed.headers, "Date"),
        body: sanitize_html(&extract_display_html(&parsed)),
    })
}
