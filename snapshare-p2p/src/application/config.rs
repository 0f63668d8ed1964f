use crate::infrastructure::tcp::MAX_FRAME_LEN;
use snapshare_core::TextFraming;
use std::time::Duration;

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How text frames are encoded and decoded
    pub text_framing: TextFraming,

    /// How long a connecting peer may take before it is given up
    pub establish_timeout: Duration,

    /// Largest frame handed to a transport
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            text_framing: TextFraming::default(),
            establish_timeout: Duration::from_secs(10),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text_framing(mut self, framing: TextFraming) -> Self {
        self.text_framing = framing;
        self
    }

    pub fn with_establish_timeout(mut self, timeout: Duration) -> Self {
        self.establish_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}
