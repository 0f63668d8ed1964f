//! Wire codec: turns messages into frames and frames back into messages.
//!
//! Two frame kinds share one byte channel without an envelope:
//! - binary payload frames are raw image bytes, recognised by header magic;
//! - text frames are UTF-8 `textMessage;<sender>;<body>`.

mod image;
mod text;

pub use image::ImageFormat;
pub use text::{DELIMITER, TEXT_MARKER};

use crate::domain::{Message, PeerIdentity};

/// How text frames treat the `;` delimiter inside sender and body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFraming {
    /// `\` escapes `;` and `\`; plain text is byte-identical to `Legacy`
    #[default]
    Escaped,
    /// Unescaped fields; encoding refuses `;`, decoding keeps the historic
    /// split-everything behaviour for interop with old peers
    Legacy,
}

/// Errors raised while encoding an outbound frame
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("The {field} contains the reserved delimiter ';'")]
    DelimiterInField { field: &'static str },

    #[error("Payload of {len} bytes is not a recognised image")]
    UnrecognizedPayload { len: usize },
}

/// Why an inbound frame could not be turned into a message
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DecodeFailure {
    #[error("Empty frame")]
    Empty,

    #[error("Frame is neither an image nor UTF-8 text")]
    NotUtf8,

    #[error("Text frame does not start with the text marker")]
    MissingMarker,

    #[error("Text frame is missing its {0}")]
    MissingField(&'static str),
}

/// Stateless encoder/decoder for session frames
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec {
    framing: TextFraming,
}

impl WireCodec {
    pub fn new(framing: TextFraming) -> Self {
        Self { framing }
    }

    /// Codec that speaks the unescaped text format
    pub fn legacy() -> Self {
        Self::new(TextFraming::Legacy)
    }

    pub fn framing(&self) -> TextFraming {
        self.framing
    }

    /// Encode a text message sent by `sender`
    pub fn encode_text(&self, sender: &PeerIdentity, body: &str) -> Result<Vec<u8>, CodecError> {
        let frame = match self.framing {
            TextFraming::Escaped => text::encode_escaped(sender.display_name(), body),
            TextFraming::Legacy => text::encode_legacy(sender.display_name(), body)?,
        };
        Ok(frame.into_bytes())
    }

    /// Binary payloads go out unchanged; anything the receiving side would
    /// not recognise as an image is refused here instead of being dropped
    /// silently on arrival.
    pub fn encode_binary(&self, payload: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        if ImageFormat::sniff(&payload).is_none() {
            return Err(CodecError::UnrecognizedPayload { len: payload.len() });
        }
        Ok(payload)
    }

    /// Decode one inbound frame. Pure, never blocks.
    pub fn decode(&self, frame: &[u8]) -> Result<Message, DecodeFailure> {
        if frame.is_empty() {
            return Err(DecodeFailure::Empty);
        }

        if let Some(format) = ImageFormat::sniff(frame) {
            return Ok(Message::Payload {
                bytes: frame.to_vec(),
                format,
            });
        }

        let text = std::str::from_utf8(frame).map_err(|_| DecodeFailure::NotUtf8)?;
        let (sender, body) = match self.framing {
            TextFraming::Escaped => text::decode_escaped(text)?,
            TextFraming::Legacy => text::decode_legacy(text)?,
        };

        Ok(Message::Text { sender, body })
    }
}
