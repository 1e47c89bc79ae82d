//! RFC 822 → `MailMessage` conversion.

use mail_parser::{MessageParser, MimeHeaders};

use crate::mailbox::MailMessage;

/// Why a fetched message was left out of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Not a parseable RFC 822 message.
    Unparseable,
    /// No From address, so there is no sender to track.
    NoSender,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unparseable => "unparseable message",
            Self::NoSender => "message has no From address",
        })
    }
}

/// Parse a raw message into a `MailMessage` with the given id.
pub fn parse_message(id: &str, raw: &[u8]) -> Result<MailMessage, Rejected> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(Rejected::Unparseable)?;
    Ok(MailMessage {
        id: id.to_string(),
        from: extract_sender(&parsed).ok_or(Rejected::NoSender)?,
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: extract_text(&parsed),
    })
}

/// Render the first From address as `Name <addr>` (or just `addr`).
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    let first = parsed.from()?.first()?;
    let address = first.address().map(str::trim).filter(|a| a.contains('@'))?;
    match first.name().map(str::trim) {
        Some(name) if !name.is_empty() => Some(format!("{name} <{address}>")),
        _ => Some(address.to_string()),
    }
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Rust Weekly <Digest@This-Week-In-Rust.org>\r\n\
        To: me@example.com\r\n\
        Subject: This Week in Rust 600\r\n\
        Message-ID: <twir-600@example.org>\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Hello Rustaceans!\r\n\
        Unsubscribe: https://example.org/u\r\n";

    const HTML_ONLY: &str = "From: deals@shop.example\r\n\
        Subject: 50% off\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <html><body><h1>Big</h1><p>Sale   today</p></body></html>\r\n";

    #[test]
    fn parse_plain_message() {
        let msg = parse_message("17", PLAIN.as_bytes()).unwrap();
        assert_eq!(msg.id, "17");
        assert_eq!(msg.from, "Rust Weekly <Digest@This-Week-In-Rust.org>");
        assert_eq!(msg.subject, "This Week in Rust 600");
        assert!(msg.body.starts_with("Hello Rustaceans!"));
        assert!(msg.body.contains("Unsubscribe"));
    }

    #[test]
    fn parse_html_only_message() {
        let msg = parse_message("18", HTML_ONLY.as_bytes()).unwrap();
        assert_eq!(msg.from, "deals@shop.example");
        assert!(msg.body.contains("Big"));
        assert!(msg.body.contains("Sale"));
        assert!(msg.body.contains("today"));
        assert!(!msg.body.contains('<'));
    }

    #[test]
    fn parse_missing_subject_uses_default() {
        let raw = "From: a@b.com\r\n\r\nbody only\r\n";
        let msg = parse_message("19", raw.as_bytes()).unwrap();
        assert_eq!(msg.from, "a@b.com");
        assert_eq!(msg.subject, "(no subject)");
    }

    #[test]
    fn parse_without_from_is_rejected() {
        let raw = "X-Custom: 1\r\nSubject: hi\r\n\r\nbody only\r\n";
        assert_eq!(parse_message("20", raw.as_bytes()), Err(Rejected::NoSender));
    }

    #[test]
    fn parse_name_only_from_is_rejected() {
        let raw = "From: Mystery Sender\r\nSubject: hi\r\n\r\nbody\r\n";
        assert_eq!(parse_message("21", raw.as_bytes()), Err(Rejected::NoSender));
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn strip_html_separates_blocks() {
        assert_eq!(strip_html("<div>One</div><div>Two</div>"), "One Two");
    }

    #[test]
    fn strip_html_with_attributes() {
        assert_eq!(
            strip_html(r#"<a href="https://example.com/unsubscribe">Unsubscribe</a>"#),
            "Unsubscribe"
        );
    }

    #[test]
    fn strip_html_plain_text_passthrough() {
        assert_eq!(strip_html("No HTML here"), "No HTML here");
    }
}
