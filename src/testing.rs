//! In-memory sender and tracing setup for tests

use crate::{MessageSender, SendError, TxEvent, WireFormat};
use std::sync::Mutex;

/// Captures every emitted event, both as a value and as its encoded frame
pub struct RecordingSender {
    format: WireFormat,
    frames: Mutex<Vec<Vec<u8>>>,
    events: Mutex<Vec<TxEvent>>,
}

impl RecordingSender {
    /// Recorder encoding frames in `format`
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            frames: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Text-frame recorder
    pub fn text() -> Self {
        Self::new(WireFormat::Text)
    }

    /// Binary-frame recorder
    pub fn binary() -> Self {
        Self::new(WireFormat::Binary)
    }

    /// Frame format in use
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encoded frames in emission order
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Text frames decoded as UTF-8 (lossy for binary frames)
    pub fn text_frames(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    /// Events in emission order
    pub fn events(&self) -> Vec<TxEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.clear();
        }
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl MessageSender for RecordingSender {
    fn send(&self, event: &TxEvent) -> Result<(), SendError> {
        let frame = self.format.encode(event)?;
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| SendError::Delivery(e.to_string().into()))?;
        let mut events = self
            .events
            .lock()
            .map_err(|e| SendError::Delivery(e.to_string().into()))?;
        frames.push(frame);
        events.push(event.clone());
        Ok(())
    }
}

/// Install a fmt subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
