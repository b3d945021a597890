//! Plain-text message construction.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Bytes of UTF-8 carried per RFC 2047 encoded word; keeps each word under
/// the 75 character limit once base64 and the `=?UTF-8?B?...?=` frame are
/// added.
const ENCODED_WORD_BYTES: usize = 45;

/// Builds an RFC 5322 message with a single `text/plain` UTF-8 part.
///
/// ```
/// use mailrelay_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build();
///
/// assert!(message.starts_with(b"From: sender@example.com\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    body: Vec<u8>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Overrides the Date header, which otherwise is the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the Message-ID, which otherwise is a fresh ULID at the
    /// sender's domain. Angle brackets are added.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the body. Bare `\n` line endings become `\r\n`.
    #[must_use]
    pub fn body(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.body = content.into();
        self
    }

    /// Renders headers and body. The result ends with CRLF and is not yet
    /// dot-stuffed.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(512 + self.body.len());
        let mut header = |name: &str, value: &str| {
            message.extend_from_slice(name.as_bytes());
            message.extend_from_slice(b": ");
            message.extend_from_slice(value.as_bytes());
            message.extend_from_slice(b"\r\n");
        };

        if let Some(from) = &self.from {
            header("From", &single_line(from));
        }

        if !self.to.is_empty() {
            let to = self
                .to
                .iter()
                .map(|to| single_line(to))
                .collect::<Vec<_>>()
                .join(", ");
            header("To", &to);
        }

        if let Some(subject) = &self.subject {
            header("Subject", &encode_header(&single_line(subject)));
        }

        let date = self.date.unwrap_or_else(Utc::now);
        header("Date", &date.to_rfc2822());

        let id = self.message_id.clone().unwrap_or_else(|| {
            let domain = self
                .from
                .as_deref()
                .and_then(|from| from.rsplit_once('@'))
                .map(|(_, domain)| domain.trim_end_matches('>'))
                .filter(|domain| !domain.is_empty())
                .unwrap_or("localhost");
            format!("{}@{domain}", Ulid::new())
        });
        header("Message-ID", &format!("<{}>", single_line(&id)));

        header("MIME-Version", "1.0");
        header("Content-Type", "text/plain; charset=UTF-8");
        header("Content-Transfer-Encoding", "8bit");

        message.extend_from_slice(b"\r\n");
        message.extend_from_slice(&normalise_line_endings(&self.body));
        if !message.ends_with(b"\r\n") {
            message.extend_from_slice(b"\r\n");
        }

        message
    }
}

/// Escapes lines that start with `.` so the DATA terminator cannot appear
/// inside the message (RFC 5321 section 4.5.2).
#[must_use]
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut stuffed = Vec::with_capacity(data.len() + 16);
    let mut line_start = true;

    for &byte in data {
        if line_start && byte == b'.' {
            stuffed.push(b'.');
        }
        stuffed.push(byte);
        line_start = byte == b'\n';
    }

    stuffed
}

fn normalise_line_endings(data: &[u8]) -> Vec<u8> {
    let mut normalised = Vec::with_capacity(data.len() + 16);
    let mut previous = 0u8;

    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            normalised.push(b'\r');
        }
        normalised.push(byte);
        previous = byte;
    }

    normalised
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 `B` encoding for header values that are not plain ASCII.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(&chunk)));
    }

    words.join("\r\n ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(message: &[u8]) -> String {
        String::from_utf8(message.to_vec()).unwrap()
    }

    #[test]
    fn test_simple_message() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap();
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .date(date)
            .message_id("fixed@example.com")
            .body("Hello World")
            .build();

        assert_eq!(
            text(&message),
            "From: sender@example.com\r\n\
             To: recipient@example.com\r\n\
             Subject: Test\r\n\
             Date: Tue, 5 Mar 2024 09:30:00 +0000\r\n\
             Message-ID: <fixed@example.com>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=UTF-8\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             \r\n\
             Hello World\r\n"
        );
    }

    #[test]
    fn test_generated_message_id_uses_sender_domain() {
        let message = text(&MessageBuilder::new().from("me@relay.example.net").build());
        let id = message
            .lines()
            .find_map(|line| line.strip_prefix("Message-ID: "))
            .unwrap();

        assert!(id.starts_with('<'));
        assert!(id.ends_with("@relay.example.net>"));
    }

    #[test]
    fn test_body_line_endings_are_normalised() {
        let message = MessageBuilder::new().body("one\ntwo\r\nthree").build();
        assert!(message.ends_with(b"\r\n\r\none\r\ntwo\r\nthree\r\n"));
    }

    #[test]
    fn test_header_injection_is_flattened() {
        let message = text(
            &MessageBuilder::new()
                .subject("hi\r\nBcc: victim@example.com")
                .build(),
        );
        assert!(message.contains("Subject: hi  Bcc: victim@example.com\r\n"));
        assert!(!message.contains("\r\nBcc:"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        assert_eq!(encode_header("Grüße"), "=?UTF-8?B?R3LDvMOfZQ==?=");

        let long = "ü".repeat(40);
        let encoded = encode_header(&long);
        assert_eq!(encoded.matches("=?UTF-8?B?").count(), 2);
        assert!(encoded.lines().all(|line| line.trim().len() <= 75));
    }

    #[test]
    fn test_dot_stuffing() {
        assert_eq!(dot_stuff(b".hidden\r\nok\r\n.\r\n"), b"..hidden\r\nok\r\n..\r\n");
        assert_eq!(dot_stuff(b"a.b\r\n"), b"a.b\r\n");
    }
}
