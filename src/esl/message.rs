//! Parsed Event Socket frames
//!
//! A frame is a block of `Name: value` header lines, optionally followed by
//! a body whose length is given by `Content-Length`. Events delivered with
//! `Content-Type: text/event-plain` carry a second header block inside the
//! body, with percent-encoded values.

use std::collections::HashMap;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const REPLY_TEXT: &str = "Reply-Text";
pub const EVENT_NAME: &str = "Event-Name";
pub const CORE_UUID: &str = "Core-UUID";
pub const API_COMMAND: &str = "API-Command";

/// Error marker at the start of a failed reply
pub const ERROR_MARKER: &str = "-ERR";
/// Benign error text meaning the command produced no subscriber reply
pub const NO_REPLY_MARKER: &str = "no reply";

/// Values of the outer `Content-Type` header the client reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    AuthRequest,
    CommandReply,
    ApiResponse,
    EventPlain,
    DisconnectNotice,
    Other,
}

impl ContentType {
    fn parse(value: &str) -> Self {
        match value {
            "auth/request" => Self::AuthRequest,
            "command/reply" => Self::CommandReply,
            "api/response" => Self::ApiResponse,
            "text/event-plain" => Self::EventPlain,
            "text/disconnect-notice" => Self::DisconnectNotice,
            _ => Self::Other,
        }
    }
}

/// One frame received from the server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EslMessage {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslMessage {
    pub fn new(headers: HashMap<String, String>, body: Option<String>) -> Self {
        Self { headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn content_type(&self) -> ContentType {
        self.header(CONTENT_TYPE)
            .map(ContentType::parse)
            .unwrap_or(ContentType::Other)
    }

    /// The body, or an empty string when the frame has none
    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }

    /// Text that decides success or failure of a reply.
    ///
    /// `api/response` frames carry it in the body, `command/reply` frames in
    /// the `Reply-Text` header.
    pub fn reply_text(&self) -> &str {
        match self.content_type() {
            ContentType::CommandReply => self.header(REPLY_TEXT).unwrap_or_default(),
            _ => self.body(),
        }
    }

    /// Whether the reply is an error, ignoring the benign "no reply" marker
    pub fn is_error(&self) -> bool {
        let text = self.reply_text().trim_start();
        text.starts_with(ERROR_MARKER) && !text.contains(NO_REPLY_MARKER)
    }

    /// Decode the body of a `text/event-plain` frame into an event
    pub fn into_event(self) -> Option<EslEvent> {
        if self.content_type() != ContentType::EventPlain {
            return None;
        }
        Some(EslEvent::parse(self.body()))
    }
}

/// An asynchronous event pushed by the server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EslEvent {
    headers: HashMap<String, String>,
}

impl EslEvent {
    /// Parse a plain event body: percent-encoded headers, a blank line and
    /// an optional payload. The payload is not needed and is skipped.
    pub fn parse(raw: &str) -> Self {
        let head = raw.split_once("\n\n").map_or(raw, |(head, _)| head);

        let headers = parse_header_block(head)
            .map(|(name, value)| {
                let decoded = match urlencoding::decode(&value) {
                    Ok(decoded) => decoded.into_owned(),
                    Err(_) => value.clone(),
                };
                (name, decoded)
            })
            .collect();

        Self { headers }
    }

    pub fn name(&self) -> Option<&str> {
        self.header(EVENT_NAME)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Split `Name: value` lines, tolerating `\r\n` endings
pub(crate) fn parse_header_block(block: &str) -> impl Iterator<Item = (String, String)> + '_ {
    block.lines().filter_map(|line| {
        let line = line.trim_end_matches('\r');
        let (name, value) = line.split_once(':')?;
        Some((name.trim().to_string(), value.trim().to_string()))
    })
}
