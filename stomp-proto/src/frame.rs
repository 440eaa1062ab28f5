use crate::registry::{builtins, Direction, FrameDescriptor, HeaderKind};
use crate::{ProtocolError, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Content type applied when a body is set from text
pub const TEXT_PLAIN: &str = "text/plain";

/// One protocol frame: a descriptor, its bound header slots, any additional
/// headers in arrival order, and the body
#[derive(Debug, Clone)]
pub struct Frame {
    descriptor: Arc<FrameDescriptor>,
    bound: Vec<Option<String>>,
    additional: Vec<(String, String)>,
    body: Bytes,
}

impl Frame {
    /// Creates an empty frame of the given type with header defaults applied
    pub fn new(descriptor: Arc<FrameDescriptor>) -> Self {
        let bound = descriptor
            .bindings()
            .iter()
            .map(|b| b.default.as_ref().map(|d| d.to_string()))
            .collect();

        Self {
            descriptor,
            bound,
            additional: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A frame with every slot empty, as the parser starts from
    pub(crate) fn blank(descriptor: Arc<FrameDescriptor>) -> Self {
        let bound = vec![None; descriptor.bindings().len()];
        Self {
            descriptor,
            bound,
            additional: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<FrameDescriptor> {
        &self.descriptor
    }

    pub fn command(&self) -> &str {
        self.descriptor.command()
    }

    pub fn direction(&self) -> Direction {
        self.descriptor.direction()
    }

    /// Looks up a header, bound slots first
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.descriptor.slot(name) {
            Some(slot) => self.bound[slot].as_deref(),
            None => self
                .additional
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
        }
    }

    /// Assigns a header. Bound headers go to their slot (validated by kind);
    /// anything else is appended to the additional headers.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();

        match self.descriptor.slot(&name) {
            Some(slot) => {
                if self.descriptor.bindings()[slot].kind == HeaderKind::Length {
                    parse_length(&name, &value)?;
                }
                self.bound[slot] = Some(value);
            }
            None => self.additional.push((name, value)),
        }
        Ok(())
    }

    /// Builder form of [`Frame::set_header`] for headers known to be valid
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        match self.descriptor.slot(&name) {
            Some(slot) => self.bound[slot] = Some(value.into()),
            None => self.additional.push((name, value.into())),
        }
        self
    }

    /// Clears a bound header slot
    pub fn clear_header(&mut self, name: &str) {
        if let Some(slot) = self.descriptor.slot(name) {
            self.bound[slot] = None;
        }
    }

    /// Bound header values in descriptor order
    pub fn bound_headers(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.descriptor
            .bindings()
            .iter()
            .zip(&self.bound)
            .map(|(b, v)| (b.name.as_ref(), v.as_deref()))
    }

    /// Headers without a slot, in insertion order
    pub fn additional_headers(&self) -> &[(String, String)] {
        &self.additional
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as UTF-8, if it is valid text
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Sets a text body, defaulting the content type to `text/plain`.
    ///
    /// Fails with `BodyNotAllowed` for frame types without a body.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.ensure_body()?;
        self.put_text(text.into());
        Ok(())
    }

    /// Sets a binary body with the given content type
    pub fn set_body(
        &mut self,
        body: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Result<()> {
        self.ensure_body()?;
        self.set_bound("content-type", content_type.into());
        self.set_body_bytes(body.into());
        Ok(())
    }

    fn ensure_body(&self) -> Result<()> {
        if self.descriptor.has_body() {
            Ok(())
        } else {
            Err(ProtocolError::BodyNotAllowed(self.command().to_string()))
        }
    }

    fn put_text(&mut self, text: String) {
        if self.header("content-type").is_none() {
            self.set_bound("content-type", TEXT_PLAIN.to_string());
        }
        self.set_body_bytes(Bytes::from(text));
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Declared body length, if the frame carries one
    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn receipt(&self) -> Option<&str> {
        self.header("receipt")
    }

    pub fn set_receipt(&mut self, receipt: impl Into<String>) {
        self.set_bound("receipt", receipt.into());
    }

    pub fn transaction(&self) -> Option<&str> {
        self.header("transaction")
    }

    pub fn set_transaction(&mut self, transaction: impl Into<String>) {
        self.set_bound("transaction", transaction.into());
    }

    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header("message-id")
    }

    pub fn subscription(&self) -> Option<&str> {
        self.header("subscription")
    }

    pub fn receipt_id(&self) -> Option<&str> {
        self.header("receipt-id")
    }

    /// Id to acknowledge a MESSAGE with: the `ack` header on 1.2 servers,
    /// otherwise the message id
    pub fn ack_id(&self) -> Option<&str> {
        self.header("ack").or_else(|| self.message_id())
    }

    pub(crate) fn set_body_bytes(&mut self, body: Bytes) {
        let length = body.len().to_string();
        self.body = body;
        self.set_bound("content-length", length);
    }

    pub(crate) fn set_raw_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_slot(&mut self, slot: usize, value: String) {
        self.bound[slot] = Some(value);
    }

    pub(crate) fn push_additional(&mut self, name: String, value: String) {
        self.additional.push((name, value));
    }

    fn set_bound(&mut self, name: &str, value: String) {
        if let Some(slot) = self.descriptor.slot(name) {
            self.bound[slot] = Some(value);
        }
    }
}

impl Frame {
    pub fn connect(host: impl Into<String>) -> Self {
        Self::new(builtins().connect.clone()).with_header("host", host)
    }

    pub fn stomp(host: impl Into<String>) -> Self {
        Self::new(builtins().stomp.clone()).with_header("host", host)
    }

    pub fn send(destination: impl Into<String>, body: impl Into<String>) -> Self {
        let mut frame = Self::new(builtins().send.clone()).with_header("destination", destination);
        frame.put_text(body.into());
        frame
    }

    pub fn subscribe(destination: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(builtins().subscribe.clone())
            .with_header("destination", destination)
            .with_header("id", id)
    }

    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::new(builtins().unsubscribe.clone()).with_header("id", id)
    }

    pub fn ack(id: impl Into<String>) -> Self {
        Self::new(builtins().ack.clone()).with_header("id", id)
    }

    pub fn nack(id: impl Into<String>) -> Self {
        Self::new(builtins().nack.clone()).with_header("id", id)
    }

    pub fn begin(transaction: impl Into<String>) -> Self {
        Self::new(builtins().begin.clone()).with_header("transaction", transaction)
    }

    pub fn commit(transaction: impl Into<String>) -> Self {
        Self::new(builtins().commit.clone()).with_header("transaction", transaction)
    }

    pub fn abort(transaction: impl Into<String>) -> Self {
        Self::new(builtins().abort.clone()).with_header("transaction", transaction)
    }

    pub fn disconnect() -> Self {
        Self::new(builtins().disconnect.clone())
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.command() == other.command()
            && self.bound == other.bound
            && self.additional == other.additional
            && self.body == other.body
    }
}

impl Eq for Frame {}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command())?;
        if let Some(destination) = self.destination() {
            write!(f, " {}", destination)?;
        }
        if self.descriptor.has_body() {
            write!(f, " ({} bytes)", self.body.len())?;
        }
        Ok(())
    }
}

pub(crate) fn parse_length(header: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ProtocolError::malformed(header, format!("not a length: {:?}", value)))
}
