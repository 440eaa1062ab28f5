use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Which peer is allowed to send a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    Bidirectional,
}

/// How a bound header value is validated on parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Text,
    /// Non-negative integer, e.g. `content-length`
    Length,
}

/// A header whose value lives in a fixed slot of the frame
#[derive(Debug, Clone)]
pub struct HeaderBinding {
    pub name: Cow<'static, str>,
    pub optional: bool,
    pub kind: HeaderKind,
    /// Value assigned when a frame of this type is created locally
    pub default: Option<Cow<'static, str>>,
}

/// Describes one frame type: its wire token, direction, body capability and
/// the ordered list of bound headers
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    command: Cow<'static, str>,
    direction: Direction,
    has_body: bool,
    bindings: Vec<HeaderBinding>,
}

impl FrameDescriptor {
    pub fn new(command: impl Into<Cow<'static, str>>, direction: Direction) -> Self {
        let command: Cow<'static, str> = command.into();
        Self {
            command: Cow::Owned(command.to_uppercase()),
            direction,
            has_body: false,
            bindings: Vec::new(),
        }
    }

    /// Frames of this type carry a body plus `content-type`/`content-length`
    pub fn with_body(mut self) -> Self {
        self.has_body = true;
        self.bind("content-type", true, HeaderKind::Text, None)
            .bind("content-length", true, HeaderKind::Length, None)
    }

    /// Adds a mandatory header
    pub fn header(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.bind(name, false, HeaderKind::Text, None)
    }

    /// Adds an optional header
    pub fn optional(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.bind(name, true, HeaderKind::Text, None)
    }

    /// Adds a header that new frames start out with
    pub fn defaulted(
        self,
        name: impl Into<Cow<'static, str>>,
        optional: bool,
        value: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.bind(name, optional, HeaderKind::Text, Some(value.into()))
    }

    pub fn bind(
        mut self,
        name: impl Into<Cow<'static, str>>,
        optional: bool,
        kind: HeaderKind,
        default: Option<Cow<'static, str>>,
    ) -> Self {
        let name: Cow<'static, str> = name.into();
        // Re-binding a name replaces the earlier slot in place
        if let Some(existing) = self.bindings.iter_mut().find(|b| b.name == name) {
            existing.optional = optional;
            existing.kind = kind;
            existing.default = default;
        } else {
            self.bindings.push(HeaderBinding {
                name,
                optional,
                kind,
                default,
            });
        }
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn bindings(&self) -> &[HeaderBinding] {
        &self.bindings
    }

    /// Slot index of a bound header
    pub fn slot(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name == name)
    }
}

/// Maps wire tokens to frame descriptors
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    descriptors: HashMap<String, Arc<FrameDescriptor>>,
}

impl FrameRegistry {
    /// An empty registry; most callers want [`FrameRegistry::with_builtins`]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in STOMP frame type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in builtins().all() {
            registry.insert(descriptor.clone());
        }
        registry
    }

    /// Registers an extension frame type, replacing any previous mapping for
    /// the same token
    pub fn register(&mut self, descriptor: FrameDescriptor) -> Arc<FrameDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.insert(descriptor.clone());
        descriptor
    }

    pub fn insert(&mut self, descriptor: Arc<FrameDescriptor>) {
        self.descriptors
            .insert(descriptor.command().to_string(), descriptor);
    }

    /// Looks up a token case-insensitively
    pub fn get(&self, command: &str) -> Option<&Arc<FrameDescriptor>> {
        self.descriptors.get(command.to_uppercase().as_str())
    }

    pub fn contains(&self, command: &str) -> bool {
        self.get(command).is_some()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Descriptors for the STOMP 1.2 command set
pub struct Builtins {
    pub connect: Arc<FrameDescriptor>,
    pub stomp: Arc<FrameDescriptor>,
    pub connected: Arc<FrameDescriptor>,
    pub send: Arc<FrameDescriptor>,
    pub subscribe: Arc<FrameDescriptor>,
    pub unsubscribe: Arc<FrameDescriptor>,
    pub ack: Arc<FrameDescriptor>,
    pub nack: Arc<FrameDescriptor>,
    pub begin: Arc<FrameDescriptor>,
    pub commit: Arc<FrameDescriptor>,
    pub abort: Arc<FrameDescriptor>,
    pub disconnect: Arc<FrameDescriptor>,
    pub message: Arc<FrameDescriptor>,
    pub receipt: Arc<FrameDescriptor>,
    pub error: Arc<FrameDescriptor>,
}

impl Builtins {
    pub fn all(&self) -> [&Arc<FrameDescriptor>; 15] {
        [
            &self.connect,
            &self.stomp,
            &self.connected,
            &self.send,
            &self.subscribe,
            &self.unsubscribe,
            &self.ack,
            &self.nack,
            &self.begin,
            &self.commit,
            &self.abort,
            &self.disconnect,
            &self.message,
            &self.receipt,
            &self.error,
        ]
    }
}

/// The process-wide built-in descriptor table
pub fn builtins() -> &'static Builtins {
    static BUILTINS: OnceLock<Builtins> = OnceLock::new();
    BUILTINS.get_or_init(build_builtins)
}

fn handshake(command: &'static str, versions: &'static str) -> FrameDescriptor {
    FrameDescriptor::new(command, Direction::ClientToServer)
        .defaulted("accept-version", false, versions)
        .header("host")
        .optional("login")
        .optional("passcode")
        .optional("heart-beat")
}

fn transactional(command: &'static str) -> FrameDescriptor {
    FrameDescriptor::new(command, Direction::ClientToServer)
        .header("transaction")
        .optional("receipt")
}

fn acknowledgement(command: &'static str) -> FrameDescriptor {
    FrameDescriptor::new(command, Direction::ClientToServer)
        .header("id")
        .optional("transaction")
        .optional("receipt")
}

fn build_builtins() -> Builtins {
    use Direction::*;

    Builtins {
        connect: Arc::new(handshake("CONNECT", "1.0,1.1,1.2")),
        stomp: Arc::new(handshake("STOMP", "1.2")),
        connected: Arc::new(
            FrameDescriptor::new("CONNECTED", ServerToClient)
                .header("version")
                .optional("session")
                .optional("server")
                .optional("heart-beat"),
        ),
        send: Arc::new(
            FrameDescriptor::new("SEND", ClientToServer)
                .header("destination")
                .with_body()
                .optional("transaction")
                .optional("receipt"),
        ),
        subscribe: Arc::new(
            FrameDescriptor::new("SUBSCRIBE", ClientToServer)
                .header("destination")
                .header("id")
                .defaulted("ack", true, "client-individual")
                .optional("receipt"),
        ),
        unsubscribe: Arc::new(
            FrameDescriptor::new("UNSUBSCRIBE", ClientToServer)
                .header("id")
                .optional("receipt"),
        ),
        ack: Arc::new(acknowledgement("ACK")),
        nack: Arc::new(acknowledgement("NACK")),
        begin: Arc::new(transactional("BEGIN")),
        commit: Arc::new(transactional("COMMIT")),
        abort: Arc::new(transactional("ABORT")),
        disconnect: Arc::new(FrameDescriptor::new("DISCONNECT", ClientToServer).optional("receipt")),
        message: Arc::new(
            FrameDescriptor::new("MESSAGE", ServerToClient)
                .header("destination")
                .header("message-id")
                .header("subscription")
                .optional("ack")
                .with_body(),
        ),
        receipt: Arc::new(FrameDescriptor::new("RECEIPT", ServerToClient).header("receipt-id")),
        error: Arc::new(
            FrameDescriptor::new("ERROR", ServerToClient)
                .optional("message")
                .optional("receipt-id")
                .with_body(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FrameRegistry::with_builtins();
        assert_eq!(registry.len(), 15);

        for token in ["SEND", "message", "Connected", "nack"] {
            assert!(registry.contains(token), "missing {}", token);
        }
        assert!(!registry.contains("PUBLISH"));
    }

    #[test]
    fn test_send_header_order() {
        let names: Vec<&str> = builtins()
            .send
            .bindings()
            .iter()
            .map(|b| b.name.as_ref())
            .collect();

        assert_eq!(
            names,
            ["destination", "content-type", "content-length", "transaction", "receipt"]
        );
    }

    #[test]
    fn test_register_extension() {
        let mut registry = FrameRegistry::with_builtins();
        let descriptor = registry.register(
            FrameDescriptor::new("ping", Direction::Bidirectional).optional("x-seq"),
        );

        assert_eq!(descriptor.command(), "PING");
        assert!(registry.contains("PING"));
        assert_eq!(registry.len(), 16);
        assert_eq!(descriptor.slot("x-seq"), Some(0));
    }

    #[test]
    fn test_rebinding_replaces_slot() {
        let descriptor = FrameDescriptor::new("X", Direction::Bidirectional)
            .optional("a")
            .header("a");

        assert_eq!(descriptor.bindings().len(), 1);
        assert!(!descriptor.bindings()[0].optional);
    }
}
