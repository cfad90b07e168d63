//! Event Socket framing
//!
//! Inbound: header block terminated by a blank line, then `Content-Length`
//! bytes of body when the header is present. Outbound: a single command line
//! followed by a blank line.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{CONTENT_LENGTH, EslMessage, parse_header_block};
use crate::errors::EslError;

/// Upper bound for a single frame body; `show channels` on a busy server is
/// the largest reply we expect.
const MAX_BODY_LENGTH: usize = 32 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct EslCodec {
    /// Headers already parsed, waiting for the announced body length
    pending: Option<(HashMap<String, String>, usize)>,
}

impl EslCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> Result<Option<EslMessage>, EslError> {
        let stray = src
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();
        src.advance(stray);

        let Some(end) = src.windows(2).position(|w| w == b"\n\n") else {
            return Ok(None);
        };

        let block = src.split_to(end);
        src.advance(2);

        let text = std::str::from_utf8(&block)
            .map_err(|e| EslError::protocol(format!("header block is not UTF-8: {e}")))?;
        let headers: HashMap<String, String> = parse_header_block(text).collect();

        match headers.get(CONTENT_LENGTH) {
            Some(raw) => {
                let length: usize = raw
                    .parse()
                    .map_err(|_| EslError::protocol(format!("invalid Content-Length: {raw}")))?;
                if length > MAX_BODY_LENGTH {
                    return Err(EslError::protocol(format!(
                        "frame body of {length} bytes exceeds limit of {MAX_BODY_LENGTH}"
                    )));
                }
                self.pending = Some((headers, length));
                Ok(None)
            }
            None => Ok(Some(EslMessage::new(headers, None))),
        }
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> Option<EslMessage> {
        let length = self.pending.as_ref().map(|(_, length)| *length)?;
        if src.len() < length {
            src.reserve(length - src.len());
            return None;
        }

        let body = src.split_to(length);
        let (headers, _) = self.pending.take()?;
        Some(EslMessage::new(
            headers,
            Some(String::from_utf8_lossy(&body).into_owned()),
        ))
    }
}

impl Decoder for EslCodec {
    type Item = EslMessage;
    type Error = EslError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_none() {
            if let Some(message) = self.decode_headers(src)? {
                return Ok(Some(message));
            }
            if self.pending.is_none() {
                return Ok(None);
            }
        }
        Ok(self.decode_body(src))
    }
}

impl Encoder<String> for EslCodec {
    type Error = EslError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains('\n') {
            return Err(EslError::protocol("commands must fit on a single line"));
        }
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\n\n");
        Ok(())
    }
}
