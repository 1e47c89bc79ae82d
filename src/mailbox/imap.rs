//! IMAP mailbox: rustls-secured IMAP session for listing and labeling.
//!
//! Labels map onto IMAP mailboxes: `ensure_label_exists` creates the
//! mailbox, `apply_label` copies the message into it. On Gmail a copy into
//! a label mailbox attaches the label and leaves the message in the inbox.
//!
//! The protocol is blocking and runs under `spawn_blocking`. One session is
//! cached between calls and dropped on any error so the next call
//! reconnects.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::parse::parse_message;
use crate::mailbox::{MailMessage, Mailbox};

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Trailing `{123}` on a response line announces a literal of 123 bytes.
static LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}$").expect("literal regex is valid"));

// ── Configuration ───────────────────────────────────────────────────

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Mailbox scanned for candidates (usually `INBOX`).
    pub mailbox: String,
    /// Only the newest `max_messages` messages are listed.
    pub max_messages: usize,
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// IMAP-backed `Mailbox`.
pub struct ImapMailbox {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` on the cached session (connecting first if needed).
    async fn with_session<T, F>(&self, op: F) -> Result<T, MailboxError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession, &ImapConfig) -> Result<T, MailboxError> + Send + 'static,
    {
        let config = self.config.clone();
        let slot = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| MailboxError::TaskFailed("IMAP session lock poisoned".into()))?;

            let mut session = match guard.take() {
                Some(session) => session,
                None => ImapSession::open(&config)?,
            };

            let result = op(&mut session, &config);
            if result.is_ok() {
                *guard = Some(session);
            }
            result
        })
        .await
        .map_err(|e| MailboxError::TaskFailed(e.to_string()))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn list_candidate_messages(&self) -> Result<Vec<MailMessage>, MailboxError> {
        self.with_session(|session, config| {
            session.select(&config.mailbox)?;
            let uids = newest(session.uid_search_all()?, config.max_messages);
            debug!(count = uids.len(), mailbox = %config.mailbox, "Fetching candidate messages");

            collect_messages(uids, |uid| session.uid_fetch_raw(uid))
        })
        .await
    }

    async fn ensure_label_exists(&self, label: &str) -> Result<(), MailboxError> {
        let label = label.to_string();
        self.with_session(move |session, _| {
            if session.mailbox_exists(&label)? {
                debug!(label = %label, "Label already exists");
                return Ok(());
            }
            session.create(&label)?;
            info!(label = %label, "Created label");
            Ok(())
        })
        .await
    }

    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), MailboxError> {
        let uid: u32 = message_id
            .parse()
            .map_err(|_| MailboxError::MessageNotFound(message_id.to_string()))?;
        let label = label.to_string();
        self.with_session(move |session, config| {
            session.select(&config.mailbox)?;
            session.uid_copy(uid, &label)
        })
        .await
    }

    async fn close(&self) -> Result<(), MailboxError> {
        let slot = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = slot.lock()
                && let Some(mut session) = guard.take()
            {
                session.logout();
            }
        })
        .await
        .map_err(|e| MailboxError::TaskFailed(e.to_string()))
    }
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Reply to one tagged command.
#[derive(Debug, Default)]
struct Response {
    /// Untagged and continuation lines, CRLF stripped.
    lines: Vec<String>,
    /// Literal payloads in the order they arrived.
    literals: Vec<Vec<u8>>,
    /// Tagged completion text after the tag, e.g. `OK SELECT completed`.
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.starts_with("OK")
    }
}

/// A logged-in IMAP connection.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
    selected: Option<String>,
}

impl ImapSession {
    /// Connect, read the greeting, and log in.
    fn open(config: &ImapConfig) -> Result<Self, MailboxError> {
        let connection_error = |reason: String| MailboxError::Connection {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connection_error(e.to_string()))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| connection_error(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connection_error(e.to_string()))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
            selected: None,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(connection_error(format!("unexpected greeting: {greeting}")));
        }

        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !login.is_ok() {
            return Err(MailboxError::AuthFailed {
                username: config.username.clone(),
            });
        }

        debug!(host = %config.host, "IMAP session opened");
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Protocol("connection closed".into()));
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send a tagged command and collect everything up to its completion.
    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(status) = line.strip_prefix(&prefix) {
                response.status = status.to_string();
                return Ok(response);
            }
            if line.starts_with("* BYE") && !cmd.eq_ignore_ascii_case("LOGOUT") {
                return Err(MailboxError::Protocol(format!("server closed session: {line}")));
            }
            response.lines.push(line);
        }
    }

    /// Run a command that must complete with OK.
    fn expect_ok(&mut self, name: &str, cmd: &str) -> Result<Response, MailboxError> {
        let response = self.command(cmd)?;
        if response.is_ok() {
            Ok(response)
        } else {
            Err(MailboxError::CommandFailed {
                command: name.to_string(),
                reason: response.status,
            })
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        if self.selected.as_deref() == Some(mailbox) {
            return Ok(());
        }
        self.expect_ok("SELECT", &format!("SELECT {}", quote(mailbox)))?;
        self.selected = Some(mailbox.to_string());
        Ok(())
    }

    fn uid_search_all(&mut self) -> Result<Vec<u32>, MailboxError> {
        let response = self.expect_ok("UID SEARCH", "UID SEARCH ALL")?;
        Ok(parse_search(&response.lines))
    }

    fn uid_fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>, MailboxError> {
        let response = self.expect_ok("UID FETCH", &format!("UID FETCH {uid} (BODY.PEEK[])"))?;
        response
            .literals
            .into_iter()
            .next()
            .ok_or_else(|| MailboxError::MessageNotFound(uid.to_string()))
    }

    fn mailbox_exists(&mut self, name: &str) -> Result<bool, MailboxError> {
        let response = self.expect_ok("LIST", &format!("LIST \"\" {}", quote(name)))?;
        Ok(response.lines.iter().any(|l| l.starts_with("* LIST")))
    }

    fn create(&mut self, name: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("CREATE {}", quote(name)))?;
        if response.is_ok() || response.status.contains("[ALREADYEXISTS]") {
            return Ok(());
        }
        Err(MailboxError::CommandFailed {
            command: "CREATE".into(),
            reason: response.status,
        })
    }

    fn uid_copy(&mut self, uid: u32, label: &str) -> Result<(), MailboxError> {
        let response = self.command(&format!("UID COPY {uid} {}", quote(label)))?;
        if response.is_ok() {
            return Ok(());
        }
        if response.status.contains("[TRYCREATE]") {
            return Err(MailboxError::LabelNotFound(label.to_string()));
        }
        Err(MailboxError::CommandFailed {
            command: "UID COPY".into(),
            reason: response.status,
        })
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Fetch and parse each UID in order.
///
/// A message that vanished or that the server refuses to return is skipped,
/// as is one that does not parse or has no sender. Connection and I/O
/// failures abort the listing.
fn collect_messages(
    uids: Vec<u32>,
    mut fetch: impl FnMut(u32) -> Result<Vec<u8>, MailboxError>,
) -> Result<Vec<MailMessage>, MailboxError> {
    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let raw = match fetch(uid) {
            Ok(raw) => raw,
            Err(e @ (MailboxError::MessageNotFound(_) | MailboxError::CommandFailed { .. })) => {
                warn!(uid, error = %e, "Skipping message that could not be fetched");
                continue;
            }
            Err(e) => return Err(e),
        };
        match parse_message(&uid.to_string(), &raw) {
            Ok(message) => messages.push(message),
            Err(reason) => warn!(uid, %reason, "Skipping message"),
        }
    }
    Ok(messages)
}

/// Quote a string for use as an IMAP astring.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn literal_size(line: &str) -> Option<usize> {
    LITERAL_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Collect UIDs from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Keep the `limit` highest (newest) UIDs, oldest first.
fn newest(mut uids: Vec<u32>, limit: usize) -> Vec<u32> {
    uids.sort_unstable();
    uids.dedup();
    let skip = uids.len().saturating_sub(limit);
    uids.split_off(skip)
}
