use crate::codec::ImageFormat;
use serde::{Deserialize, Serialize};

/// A decoded frame, handed to the event dispatcher and then discarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Short text; `sender` is the display name carried inside the frame
    Text { sender: String, body: String },
    /// Raw image bytes exactly as they arrived
    Payload { bytes: Vec<u8>, format: ImageFormat },
}
