use crate::frame::{parse_length, Frame};
use crate::registry::{FrameRegistry, HeaderKind};
use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace};

/// Frame terminator on the wire
pub const FRAME_TERMINATOR: u8 = 0;

/// Heartbeat byte on the wire
pub const HEARTBEAT: u8 = b'\n';

/// Something the client puts on the wire
#[derive(Debug, Clone, Copy)]
pub enum Outbound<'a> {
    Frame(&'a Frame),
    Heartbeat,
}

/// Serializes frames to wire bytes and parses them back using a registry
#[derive(Debug, Clone)]
pub struct FrameCodec {
    registry: Arc<FrameRegistry>,
}

impl FrameCodec {
    pub fn new(registry: Arc<FrameRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    /// Serializes a frame without the trailing terminator
    pub fn serialize(&self, frame: &Frame) -> Result<BytesMut> {
        if !self.registry.contains(frame.command()) {
            return Err(ProtocolError::UnknownFrameType(frame.command().to_string()));
        }

        let descriptor = frame.descriptor();
        let mut out = BytesMut::with_capacity(64 + frame.body().len());

        out.put_slice(descriptor.command().as_bytes());
        out.put_u8(b'\n');

        for (binding, (name, value)) in descriptor.bindings().iter().zip(frame.bound_headers()) {
            match value {
                Some(value) if !value.trim().is_empty() => {
                    if binding.kind == HeaderKind::Length {
                        parse_length(name, value)?;
                    }
                    put_header(&mut out, name, value);
                }
                _ if !binding.optional => {
                    return Err(ProtocolError::MissingMandatoryHeader(name.to_string()));
                }
                _ => {}
            }
        }

        for (name, value) in frame.additional_headers() {
            put_header(&mut out, name, value);
        }

        out.put_u8(b'\n');

        if descriptor.has_body() {
            if let Some(length) = frame.content_length() {
                if length != frame.body().len() {
                    return Err(ProtocolError::malformed(
                        "content-length",
                        format!("declares {} bytes but body has {}", length, frame.body().len()),
                    ));
                }
            }
            out.put_slice(frame.body());
        }

        trace!("Serialized {} into {} bytes", frame.command(), out.len());
        Ok(out)
    }

    /// Parses one frame (without its terminator)
    pub fn parse(&self, data: &[u8]) -> Result<Frame> {
        let mut lines = Lines::new(data);
        lines.skip_blank();

        let command = match lines.next() {
            Some(line) => String::from_utf8_lossy(line).trim().to_uppercase(),
            None => String::new(),
        };

        let descriptor = self
            .registry
            .get(&command)
            .ok_or_else(|| ProtocolError::UnknownFrameType(command.clone()))?
            .clone();

        let mut frame = Frame::blank(descriptor.clone());
        let mut assigned = vec![false; descriptor.bindings().len()];
        let mut headers_done = false;

        while let Some(line) = lines.next() {
            if line.is_empty() {
                headers_done = true;
                break;
            }

            let line = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::malformed("(header line)", "not valid UTF-8"))?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::malformed(line, "missing ':' separator"))?;

            match descriptor.slot(name) {
                // Repeated bound headers: the first occurrence wins
                Some(slot) if assigned[slot] => {}
                Some(slot) => {
                    if descriptor.bindings()[slot].kind == HeaderKind::Length {
                        parse_length(name, value)?;
                    }
                    frame.set_slot(slot, value.to_string());
                    assigned[slot] = true;
                }
                None => frame.push_additional(name.to_string(), value.to_string()),
            }
        }

        if descriptor.has_body() && headers_done {
            let rest = lines.remainder();
            let body = match frame.content_length() {
                Some(length) if length > rest.len() => {
                    return Err(ProtocolError::malformed(
                        "content-length",
                        format!("declares {} bytes but only {} present", length, rest.len()),
                    ));
                }
                Some(length) => &rest[..length],
                None => rest,
            };
            frame.set_raw_body(Bytes::copy_from_slice(body));
        }

        debug!("Parsed {}", frame);
        Ok(frame)
    }
}

impl tokio_util::codec::Encoder<Outbound<'_>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Outbound<'_>, dst: &mut BytesMut) -> Result<()> {
        match item {
            Outbound::Frame(frame) => {
                let data = self.serialize(frame)?;
                dst.reserve(data.len() + 1);
                dst.put_slice(&data);
                dst.put_u8(FRAME_TERMINATOR);
            }
            Outbound::Heartbeat => dst.put_u8(HEARTBEAT),
        }
        Ok(())
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_u8(b':');
    out.put_slice(value.as_bytes());
    out.put_u8(b'\n');
}

/// Splits a byte slice into `\n` or `\r\n` terminated lines
struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn skip_blank(&mut self) {
        while matches!(self.data.get(self.pos), Some(b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn remainder(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;

        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}
