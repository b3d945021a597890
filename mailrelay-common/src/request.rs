//! The request carried by one connection to the relay's internal socket.
//!
//! On the wire it is a single JSON object followed by a newline:
//!
//! ```json
//! {"recipient": "a@b.com", "subject": "hi", "body": "aGVsbG8="}
//! ```
//!
//! `body` is standard, padded base64. `null` or an absent body is an empty
//! message body.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub recipient: String,
    pub subject: String,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl EmailRequest {
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Option::<String>::deserialize(deserializer)?.map_or_else(
            || Ok(Vec::new()),
            |encoded| STANDARD.decode(encoded).map_err(D::Error::custom),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_decodes_base64_body() {
        let request: EmailRequest = serde_json::from_str(
            r#"{"recipient": "a@b.com", "subject": "hi", "body": "aGVsbG8="}"#,
        )
        .unwrap();

        assert_eq!(request, EmailRequest::new("a@b.com", "hi", b"hello".to_vec()));
    }

    #[test]
    fn test_null_or_missing_body_is_empty() {
        let request: EmailRequest =
            serde_json::from_str(r#"{"recipient": "a@b.com", "subject": "hi", "body": null}"#)
                .unwrap();
        assert!(request.body.is_empty());

        let request: EmailRequest =
            serde_json::from_str(r#"{"recipient": "a@b.com", "subject": "hi"}"#).unwrap();
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_rejects_body_that_is_not_base64() {
        let result = serde_json::from_str::<EmailRequest>(
            r#"{"recipient": "a@b.com", "subject": "hi", "body": "not base64!"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_missing_recipient() {
        let result = serde_json::from_str::<EmailRequest>(r#"{"subject": "hi", "body": ""}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_encodes_body_as_base64() {
        let json = serde_json::to_string(&EmailRequest::new("a@b.com", "hi", "hello")).unwrap();
        assert_eq!(
            json,
            r#"{"recipient":"a@b.com","subject":"hi","body":"aGVsbG8="}"#
        );
    }
}
