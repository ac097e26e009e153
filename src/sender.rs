//! Outbound event channel

use crate::{CompensatorStats, SendError, TxEvent, TxObserver, WireFormat};
use std::sync::Arc;

/// Transport capability delivering events to the coordinator.
///
/// Implementations may buffer, retry or drop; the compensation protocol never
/// waits for confirmation and never retries a failed send itself.
pub trait MessageSender: Send + Sync + 'static {
    /// Deliver one event; a returned error is logged and counted by the caller
    fn send(&self, event: &TxEvent) -> Result<(), SendError>;
}

impl<F> MessageSender for F
where
    F: Fn(&TxEvent) -> Result<(), SendError> + Send + Sync + 'static,
{
    fn send(&self, event: &TxEvent) -> Result<(), SendError> {
        self(event)
    }
}

/// Transport for events already encoded into wire frames
pub trait FrameSink: Send + Sync + 'static {
    /// Deliver one frame
    fn send_frame(&self, frame: &[u8]) -> Result<(), SendError>;
}

impl<F> FrameSink for F
where
    F: Fn(&[u8]) -> Result<(), SendError> + Send + Sync + 'static,
{
    fn send_frame(&self, frame: &[u8]) -> Result<(), SendError> {
        self(frame)
    }
}

/// [`MessageSender`] that encodes each event before handing it to a [`FrameSink`]
pub struct EncodingSender {
    format: WireFormat,
    sink: Arc<dyn FrameSink>,
}

impl EncodingSender {
    /// Encode with `format` and deliver through `sink`
    pub fn new(format: WireFormat, sink: Arc<dyn FrameSink>) -> Self {
        Self { format, sink }
    }

    /// Frame format in use
    pub fn format(&self) -> WireFormat {
        self.format
    }
}

impl MessageSender for EncodingSender {
    fn send(&self, event: &TxEvent) -> Result<(), SendError> {
        let frame = self.format.encode(event)?;
        self.sink.send_frame(&frame)
    }
}

/// Hands events to the [`MessageSender`] in call order.
///
/// A failed send is reported to the observer and counted, never propagated:
/// the business call's outcome must not depend on event delivery.
#[derive(Clone)]
pub struct EventChannel {
    sender: Arc<dyn MessageSender>,
    observer: Arc<dyn TxObserver>,
    stats: Arc<CompensatorStats>,
}

impl EventChannel {
    /// Channel over `sender`, reporting to `observer` and `stats`
    pub fn new(
        sender: Arc<dyn MessageSender>,
        observer: Arc<dyn TxObserver>,
        stats: Arc<CompensatorStats>,
    ) -> Self {
        Self {
            sender,
            observer,
            stats,
        }
    }

    /// Emit one event, returning whether the sender accepted it
    pub fn emit(&self, event: &TxEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => {
                CompensatorStats::incr(&self.stats.events_sent);
                true
            }
            Err(error) => {
                CompensatorStats::incr(&self.stats.send_failures);
                self.observer.on_send_failed(event, &error.to_string());
                false
            }
        }
    }

    /// Observer notified of lifecycle events
    pub fn observer(&self) -> &Arc<dyn TxObserver> {
        &self.observer
    }

    /// Shared counters
    pub fn stats(&self) -> &Arc<CompensatorStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoOpObserver;
    use std::sync::Mutex;

    fn ended() -> TxEvent {
        TxEvent::ended("G1".into(), "L1".into(), "G1".into(), "delete(User)".into())
    }

    #[test]
    fn test_closure_sender_receives_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sender = move |event: &TxEvent| -> Result<(), SendError> {
            sink.lock().unwrap().push(event.event_type());
            Ok(())
        };
        let stats = Arc::new(CompensatorStats::new());
        let channel = EventChannel::new(Arc::new(sender), Arc::new(NoOpObserver), stats.clone());

        let started = TxEvent::started("G1".into(), "L1".into(), "G1".into(), "delete(User)".into(), vec![]);
        assert!(channel.emit(&started));
        assert!(channel.emit(&ended()));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![crate::EventType::Started, crate::EventType::Ended]
        );
        assert_eq!(stats.snapshot().events_sent, 2);
    }

    #[test]
    fn test_encoding_sender_hands_frames_to_sink() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let sender = EncodingSender::new(
            WireFormat::Text,
            Arc::new(move |frame: &[u8]| -> Result<(), SendError> {
                sink.lock().unwrap().push(frame.to_vec());
                Ok(())
            }),
        );

        sender.send(&ended()).unwrap();
        assert_eq!(
            *frames.lock().unwrap(),
            vec![b"G1:L1:G1:delete(User):TxEndedEvent".to_vec()]
        );
    }

    #[test]
    fn test_send_failure_is_counted_not_raised() {
        let sender = |_: &TxEvent| -> Result<(), SendError> { Err(SendError::Delivery("broker down".into())) };
        let stats = Arc::new(CompensatorStats::new());
        let channel = EventChannel::new(Arc::new(sender), Arc::new(NoOpObserver), stats.clone());

        assert!(!channel.emit(&ended()));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.events_sent, 0);
    }
}
