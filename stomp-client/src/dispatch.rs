use stomp_proto::{Frame, HeartBeat, ProtocolError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// How to answer a MESSAGE frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageAck {
    #[default]
    Ack,
    Nack,
}

/// Callbacks for inbound traffic.
///
/// Callbacks run on the receive loop. An `Err` is logged and otherwise
/// ignored, so a failing handler never tears the connection down.
pub trait SessionHandler: Send + Sync + 'static {
    /// A MESSAGE arrived; the return value selects ACK or NACK
    fn on_message(&self, message: &Frame) -> anyhow::Result<MessageAck> {
        let _ = message;
        Ok(MessageAck::Ack)
    }

    fn on_receipt(&self, receipt: &Frame) -> anyhow::Result<()> {
        let _ = receipt;
        Ok(())
    }

    /// The server reported an error; it usually closes the connection next
    fn on_error(&self, error: &Frame) -> anyhow::Result<()> {
        let _ = error;
        Ok(())
    }

    /// Any frame without a dedicated callback
    fn on_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        let _ = frame;
        Ok(())
    }

    /// The connection ended; `reason` is set when it ended on an error
    fn on_disconnect(&self, reason: Option<&ProtocolError>) {
        let _ = reason;
    }
}

/// Handler that accepts every message and ignores everything else
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

/// Inbound frames by the handling they need
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Frame),
    Receipt(Frame),
    Error(Frame),
    Connected(Frame),
    Other(Frame),
}

impl From<Frame> for Inbound {
    fn from(frame: Frame) -> Self {
        match frame.command() {
            "MESSAGE" => Inbound::Message(frame),
            "RECEIPT" => Inbound::Receipt(frame),
            "ERROR" => Inbound::Error(frame),
            "CONNECTED" => Inbound::Connected(frame),
            _ => Inbound::Other(frame),
        }
    }
}

/// What the session has to do after a frame was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Send this frame back (ACK or NACK)
    Reply(Frame),
    /// Handshake finished
    Connected {
        version: String,
        heart_beat: HeartBeat,
    },
    /// Server sent ERROR with this message
    ServerError(String),
}

/// Routes inbound frames to the session handler
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn SessionHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn SessionHandler>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<dyn SessionHandler> {
        &self.handler
    }

    pub fn dispatch(&self, frame: Frame) -> Outcome {
        match Inbound::from(frame) {
            Inbound::Message(message) => self.handle_message(&message),
            Inbound::Receipt(receipt) => {
                isolate("receipt", || self.handler.on_receipt(&receipt));
                Outcome::Handled
            }
            Inbound::Error(error) => {
                let message = error
                    .header("message")
                    .map(str::to_string)
                    .or_else(|| error.body_text().map(str::to_string))
                    .unwrap_or_default();
                warn!("Server error: {}", message);
                isolate("error", || self.handler.on_error(&error));
                Outcome::ServerError(message)
            }
            Inbound::Connected(connected) => handle_connected(&connected),
            Inbound::Other(frame) => {
                isolate("frame", || self.handler.on_frame(&frame));
                Outcome::Handled
            }
        }
    }

    fn handle_message(&self, message: &Frame) -> Outcome {
        let ack = isolate("message", || self.handler.on_message(message)).unwrap_or_default();

        let Some(id) = message.ack_id() else {
            warn!("MESSAGE without message-id, cannot acknowledge");
            return Outcome::Handled;
        };

        debug!("Replying {:?} for message {}", ack, id);
        match ack {
            MessageAck::Ack => Outcome::Reply(Frame::ack(id)),
            MessageAck::Nack => Outcome::Reply(Frame::nack(id)),
        }
    }
}

fn handle_connected(connected: &Frame) -> Outcome {
    let version = connected.header("version").unwrap_or("1.0").to_string();

    let heart_beat = match connected.header("heart-beat").map(str::parse::<HeartBeat>) {
        Some(Ok(heart_beat)) => heart_beat,
        Some(Err(e)) => {
            warn!("Ignoring server heart-beat: {}", e);
            HeartBeat::default()
        }
        None => HeartBeat::default(),
    };

    Outcome::Connected {
        version,
        heart_beat,
    }
}

/// Runs a callback, logging an error or a panic instead of propagating it
fn isolate<T>(event: &str, callback: impl FnOnce() -> anyhow::Result<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("{} handler failed: {:#}", event, e);
            None
        }
        Err(payload) => {
            warn!("{} handler panicked: {}", event, panic_message(&*payload));
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stomp_proto::builtins;

    #[derive(Default)]
    struct Recorder {
        nack: bool,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, event: &str, frame: &Frame) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", event, frame.command()));
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    impl SessionHandler for Recorder {
        fn on_message(&self, message: &Frame) -> anyhow::Result<MessageAck> {
            self.record("message", message)?;
            Ok(if self.nack { MessageAck::Nack } else { MessageAck::Ack })
        }

        fn on_receipt(&self, receipt: &Frame) -> anyhow::Result<()> {
            self.record("receipt", receipt)
        }

        fn on_error(&self, error: &Frame) -> anyhow::Result<()> {
            self.record("error", error)
        }

        fn on_frame(&self, frame: &Frame) -> anyhow::Result<()> {
            self.record("frame", frame)
        }
    }

    fn message(id: &str) -> Frame {
        Frame::new(builtins().message.clone())
            .with_header("destination", "/queue/a")
            .with_header("message-id", id)
            .with_header("subscription", "s-1")
    }

    #[test]
    fn test_classify() {
        assert!(matches!(Inbound::from(message("1")), Inbound::Message(_)));
        assert!(matches!(
            Inbound::from(Frame::new(builtins().receipt.clone())),
            Inbound::Receipt(_)
        ));
        assert!(matches!(Inbound::from(Frame::ack("1")), Inbound::Other(_)));
    }

    #[test]
    fn test_message_acked() {
        let dispatcher = Dispatcher::new(Arc::new(Recorder::default()));
        assert_eq!(dispatcher.dispatch(message("m-1")), Outcome::Reply(Frame::ack("m-1")));
    }

    #[test]
    fn test_message_nacked_on_request() {
        let recorder = Recorder {
            nack: true,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(recorder));
        assert_eq!(dispatcher.dispatch(message("m-2")), Outcome::Reply(Frame::nack("m-2")));
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let recorder = Arc::new(Recorder {
            nack: true,
            fail: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(recorder.clone());

        // The failure falls back to a plain ACK
        assert_eq!(dispatcher.dispatch(message("m-3")), Outcome::Reply(Frame::ack("m-3")));
        assert_eq!(
            dispatcher.dispatch(Frame::new(builtins().receipt.clone())),
            Outcome::Handled
        );
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    struct Panicking;

    impl SessionHandler for Panicking {
        fn on_message(&self, _message: &Frame) -> anyhow::Result<MessageAck> {
            panic!("handler bug");
        }

        fn on_receipt(&self, _receipt: &Frame) -> anyhow::Result<()> {
            panic!("{}", String::from("owned panic"));
        }
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let dispatcher = Dispatcher::new(Arc::new(Panicking));

        assert_eq!(dispatcher.dispatch(message("m-4")), Outcome::Reply(Frame::ack("m-4")));
        assert_eq!(
            dispatcher.dispatch(Frame::new(builtins().receipt.clone())),
            Outcome::Handled
        );
    }

    #[test]
    fn test_error_frame() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());
        let error = Frame::new(builtins().error.clone()).with_header("message", "no such queue");

        assert_eq!(
            dispatcher.dispatch(error),
            Outcome::ServerError("no such queue".to_string())
        );
        assert_eq!(recorder.seen.lock().unwrap()[0], "error:ERROR");
    }

    #[test]
    fn test_connected_negotiation_values() {
        let dispatcher = Dispatcher::new(Arc::new(NoopHandler));
        let connected = Frame::new(builtins().connected.clone())
            .with_header("version", "1.2")
            .with_header("heart-beat", "2000,3000");

        assert_eq!(
            dispatcher.dispatch(connected),
            Outcome::Connected {
                version: "1.2".to_string(),
                heart_beat: HeartBeat { send_ms: 2000, receive_ms: 3000 },
            }
        );
    }

    #[test]
    fn test_connected_with_bad_heart_beat() {
        let dispatcher = Dispatcher::new(Arc::new(NoopHandler));
        let connected = Frame::new(builtins().connected.clone())
            .with_header("version", "1.1")
            .with_header("heart-beat", "soon");

        assert!(matches!(
            dispatcher.dispatch(connected),
            Outcome::Connected { heart_beat, .. } if heart_beat == HeartBeat::default()
        ));
    }

    #[test]
    fn test_other_frames_reach_generic_callback() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        dispatcher.dispatch(Frame::disconnect());
        assert_eq!(recorder.seen.lock().unwrap()[0], "frame:DISCONNECT");
    }
}
