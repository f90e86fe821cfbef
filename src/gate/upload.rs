//! Bounded decoding of configuration uploads.
//!
//! Each multipart field is decoded as UTF-8 incrementally and reading stops
//! once the character budget is spent. Nothing decoded here is parsed or
//! persisted until the submitted form token has been checked.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use tracing::{debug, instrument, warn};

use super::{error::GateError, session::Session, token};

/// Upper bound, in characters, for any decoded field.
pub const DEFAULT_MAX_CHARS: usize = 51_200;

pub const FIELD_PAYLOAD: &str = "uploadFile";
pub const FIELD_TOKEN: &str = "formToken";

const REPLACEMENT: &str = "\u{FFFD}";

/// What was read from the upload, before any validation.
#[derive(Debug, Default)]
pub struct UploadedConfigurationDraft {
    raw_payload: String,
    submitted_token: Option<String>,
}

impl UploadedConfigurationDraft {
    #[must_use]
    pub fn new(raw_payload: String, submitted_token: Option<String>) -> Self {
        Self {
            raw_payload,
            submitted_token,
        }
    }

    #[must_use]
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    #[must_use]
    pub fn submitted_token(&self) -> Option<&str> {
        self.submitted_token.as_deref()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UploadGuard {
    max_chars: usize,
}

impl Default for UploadGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl UploadGuard {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Read the payload and token fields from a multipart stream.
    ///
    /// A repeated field name replaces the earlier value. Unknown fields are
    /// skipped. Content beyond the character budget is dropped silently.
    /// The extractor must come from a route without a byte limit
    /// (`DefaultBodyLimit::disable`), or long uploads fail on length.
    ///
    /// # Errors
    /// Returns `Read` when the stream is malformed or aborted.
    #[instrument(skip_all, fields(max_chars = self.max_chars))]
    pub async fn decode(
        &self,
        multipart: &mut Multipart,
    ) -> Result<UploadedConfigurationDraft, GateError> {
        let mut draft = UploadedConfigurationDraft::default();
        while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some(FIELD_PAYLOAD) => {
                    draft.raw_payload = self.read_field(&mut field).await?;
                }
                Some(FIELD_TOKEN) => {
                    draft.submitted_token = Some(self.read_field(&mut field).await?);
                }
                name => debug!(?name, "skipping multipart field"),
            }
        }
        Ok(draft)
    }

    /// Hand out the payload only when the token matches the session.
    ///
    /// # Errors
    /// `InvalidFormToken` when the token does not validate (the payload is
    /// dropped unread), `MissingParameter` when no file was uploaded.
    pub fn accept(
        &self,
        session: &Session,
        draft: UploadedConfigurationDraft,
    ) -> Result<String, GateError> {
        if !token::validate(session, draft.submitted_token()) {
            warn!("upload rejected: form token mismatch");
            return Err(GateError::InvalidFormToken);
        }
        if draft.raw_payload.trim().is_empty() {
            return Err(GateError::MissingParameter(FIELD_PAYLOAD));
        }
        Ok(draft.raw_payload)
    }

    async fn read_field(&self, field: &mut Field<'_>) -> Result<String, GateError> {
        let mut decoder = BoundedDecoder::new(self.max_chars);
        while let Some(chunk) = field.chunk().await.map_err(read_error)? {
            if decoder.push(&chunk) {
                debug!("field truncated at character limit");
                break;
            }
        }
        Ok(decoder.finish())
    }
}

fn read_error(err: MultipartError) -> GateError {
    warn!("unable to read upload: {err}");
    GateError::Read(err.body_text())
}

/// Incremental UTF-8 decoder that stops after `max_chars` characters.
///
/// Invalid sequences decode to U+FFFD. A sequence split across chunks is
/// carried over to the next push.
#[derive(Debug)]
struct BoundedDecoder {
    max_chars: usize,
    chars: usize,
    text: String,
    pending: Vec<u8>,
}

impl BoundedDecoder {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chars: 0,
            text: String::new(),
            pending: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.chars >= self.max_chars
    }

    /// Returns `true` once the budget is spent.
    fn push(&mut self, bytes: &[u8]) -> bool {
        if self.is_full() {
            return true;
        }
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut rest: &[u8] = &input;
        while !rest.is_empty() && !self.is_full() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.append(valid);
                    rest = &[];
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    self.append(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.append(REPLACEMENT);
                            rest = &tail[len..];
                        }
                        // Incomplete sequence at the end of the chunk.
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        if !self.is_full() {
            self.pending = rest.to_vec();
        }
        self.is_full()
    }

    fn append(&mut self, text: &str) {
        let remaining = self.max_chars - self.chars;
        match text.char_indices().nth(remaining) {
            Some((cut, _)) => {
                self.text.push_str(&text[..cut]);
                self.chars = self.max_chars;
            }
            None => {
                self.text.push_str(text);
                self.chars += text.chars().count();
            }
        }
    }

    fn finish(mut self) -> String {
        if !self.pending.is_empty() && !self.is_full() {
            self.append(REPLACEMENT);
        }
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{
        body::Body,
        extract::{DefaultBodyLimit, FromRequest},
        http::{header, Request},
    };
    use tower::{ServiceBuilder, ServiceExt};

    const BOUNDARY: &str = "ldapgate-test-boundary";

    /// Encode `(name, value)` pairs as a multipart/form-data body.
    fn multipart_body(fields: &[(&str, &str)]) -> String {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    async fn multipart(body: impl Into<Body>) -> Result<Multipart> {
        let request = Request::builder()
            .method("POST")
            .uri("/action?processAction=uploadConfig")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body.into())?;
        // Same body limit as the `/action` route.
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::disable())
            .service_fn(|request: Request<Body>| async move {
                Multipart::from_request(request, &())
                    .await
                    .map_err(|rejection| anyhow::anyhow!(rejection.body_text()))
            })
            .oneshot(request)
            .await
    }

    #[tokio::test]
    async fn decode_reads_payload_and_token() -> Result<()> {
        let body = multipart_body(&[
            (FIELD_PAYLOAD, r#"{"properties":{}}"#),
            ("comment", "ignored"),
            (FIELD_TOKEN, "abc123"),
        ]);
        let draft = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await?;

        assert_eq!(draft.raw_payload(), r#"{"properties":{}}"#);
        assert_eq!(draft.submitted_token(), Some("abc123"));
        Ok(())
    }

    #[tokio::test]
    async fn decode_truncates_large_payload() -> Result<()> {
        let large = "a".repeat(1_000_000);
        let body = multipart_body(&[(FIELD_PAYLOAD, &large), (FIELD_TOKEN, "t")]);
        let draft = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await?;

        assert_eq!(draft.raw_payload().chars().count(), 51_200);
        assert_eq!(draft.submitted_token(), Some("t"));
        Ok(())
    }

    #[tokio::test]
    async fn decode_truncates_large_multibyte_payload() -> Result<()> {
        // 3 MB on the wire, well past axum's default body limit.
        let large = "\u{20AC}".repeat(1_000_000);
        let body = multipart_body(&[(FIELD_PAYLOAD, &large), (FIELD_TOKEN, "t")]);
        let draft = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await?;

        assert_eq!(draft.raw_payload().chars().count(), 51_200);
        assert!(draft.raw_payload().chars().all(|c| c == '\u{20AC}'));
        assert_eq!(draft.submitted_token(), Some("t"));
        Ok(())
    }

    #[tokio::test]
    async fn decode_keeps_last_duplicate_field() -> Result<()> {
        let body = multipart_body(&[
            (FIELD_TOKEN, "first"),
            (FIELD_PAYLOAD, "one"),
            (FIELD_TOKEN, "second"),
            (FIELD_PAYLOAD, "two"),
        ]);
        let draft = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await?;

        assert_eq!(draft.raw_payload(), "two");
        assert_eq!(draft.submitted_token(), Some("second"));
        Ok(())
    }

    #[tokio::test]
    async fn decode_without_payload_is_empty() -> Result<()> {
        let body = multipart_body(&[(FIELD_TOKEN, "t")]);
        let draft = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await?;
        assert!(draft.raw_payload().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn truncated_stream_is_a_read_error() -> Result<()> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{FIELD_PAYLOAD}\"\r\n\r\nhalf a docu"
        );
        let result = UploadGuard::default()
            .decode(&mut multipart(body).await?)
            .await;
        assert!(matches!(result, Err(GateError::Read(_))));
        Ok(())
    }

    #[test]
    fn accept_rejects_bad_token_before_payload() {
        let session = Session::new();
        let draft = UploadedConfigurationDraft {
            raw_payload: "not even a configuration".to_string(),
            submitted_token: Some("forged".to_string()),
        };
        assert!(matches!(
            UploadGuard::default().accept(&session, draft),
            Err(GateError::InvalidFormToken)
        ));
    }

    #[test]
    fn accept_requires_payload() {
        let session = Session::new();
        let draft = UploadedConfigurationDraft {
            raw_payload: " \r\n".to_string(),
            submitted_token: Some(session.verification_token().to_string()),
        };
        assert!(matches!(
            UploadGuard::default().accept(&session, draft),
            Err(GateError::MissingParameter(FIELD_PAYLOAD))
        ));
    }

    #[test]
    fn accept_returns_payload_for_valid_token() -> Result<()> {
        let session = Session::new();
        let draft = UploadedConfigurationDraft {
            raw_payload: "{}".to_string(),
            submitted_token: Some(session.verification_token().to_string()),
        };
        assert_eq!(UploadGuard::default().accept(&session, draft)?, "{}");
        Ok(())
    }

    #[test]
    fn decoder_joins_sequences_split_across_chunks() {
        let bytes = "héllo".as_bytes();
        let mut decoder = BoundedDecoder::new(10);
        assert!(!decoder.push(&bytes[..2]));
        assert!(!decoder.push(&bytes[2..]));
        assert_eq!(decoder.finish(), "héllo");
    }

    #[test]
    fn decoder_counts_characters_not_bytes() {
        let mut decoder = BoundedDecoder::new(3);
        assert!(decoder.push("ééééé".as_bytes()));
        assert_eq!(decoder.finish(), "ééé");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = BoundedDecoder::new(10);
        decoder.push(&[b'a', 0xFF, b'b', 0xE2, 0x82]);
        assert_eq!(decoder.finish(), "a\u{FFFD}b\u{FFFD}");
    }
}
