//! Binary codec for the OSC wire format.
//!
//! Layout rules (all multi-byte fields big-endian):
//! - strings are null-terminated ASCII, zero-padded to a multiple of 4
//! - int32/float32 take 4 bytes, float64 takes 8
//! - blobs are a 4-byte length prefix, raw bytes, padding to 4-byte alignment
//! - bundles open with the literal `#bundle\0`, an 8-byte time tag, then
//!   length-prefixed elements

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};
use crate::osc::time::TimeTag;
use crate::osc::value::{OscBundle, OscMessage, OscPacket, OscValue, validate_address};

/// Literal tag opening every serialized bundle.
pub const BUNDLE_TAG: &str = "#bundle";

/// Encode a packet, dispatching on its variant.
pub fn encode_packet(packet: &OscPacket) -> WireResult<Bytes> {
    match packet {
        OscPacket::Message(message) => encode_message(message),
        OscPacket::Bundle(bundle) => encode_bundle(bundle),
    }
}

/// Encode a single message: address, type-tag string, then arguments.
pub fn encode_message(message: &OscMessage) -> WireResult<Bytes> {
    validate_address(&message.address)?;

    let mut buf = BytesMut::new();
    put_padded_str(&mut buf, &message.address)?;

    let mut tags = String::with_capacity(message.args.len() + 1);
    tags.push(',');
    for arg in &message.args {
        tags.push(arg.type_tag());
    }
    put_padded_str(&mut buf, &tags)?;

    for arg in &message.args {
        match arg {
            OscValue::Str(s) => put_padded_str(&mut buf, s)?,
            OscValue::Int(i) => buf.put_i32(*i),
            OscValue::Float(f) => buf.put_f32(*f),
            OscValue::Double(d) => buf.put_f64(*d),
            OscValue::Blob(bytes) => put_blob(&mut buf, bytes)?,
            OscValue::True | OscValue::False | OscValue::Nil => {}
        }
    }

    Ok(buf.freeze())
}

/// Encode a bundle: `#bundle` tag, time tag, then each element wrapped
/// as a length prefix plus its own encoding, recursively.
pub fn encode_bundle(bundle: &OscBundle) -> WireResult<Bytes> {
    let mut buf = BytesMut::new();
    put_padded_str(&mut buf, BUNDLE_TAG)?;
    buf.put_u32(bundle.time_tag.seconds);
    buf.put_u32(bundle.time_tag.fraction);

    for element in &bundle.elements {
        let encoded = encode_packet(element)?;
        if encoded.len() > i32::MAX as usize {
            return Err(WireError::InvalidArgument(
                "bundle element exceeds 2^31-1 bytes".into(),
            ));
        }
        buf.put_u32(encoded.len() as u32);
        buf.put_slice(&encoded);
    }

    Ok(buf.freeze())
}

/// Decode a packet, peeking the leading byte to dispatch: `#` opens a
/// bundle, anything else is treated as a message address.
pub fn decode_packet(bytes: &[u8]) -> WireResult<OscPacket> {
    match bytes.first() {
        Some(b'#') => decode_bundle(bytes).map(OscPacket::Bundle),
        Some(_) => decode_message(bytes).map(OscPacket::Message),
        None => Err(WireError::MalformedProtocol("empty packet".into())),
    }
}

/// Decode a single message from a byte buffer.
///
/// A buffer that ends right after the address yields a zero-argument
/// message; a present type-tag string must start with `,`.
pub fn decode_message(bytes: &[u8]) -> WireResult<OscMessage> {
    let mut reader = Reader::new(bytes);

    let address = reader.read_padded_str()?;
    if !address.starts_with('/') {
        return Err(WireError::MalformedProtocol(format!(
            "message address must begin with '/': {address:?}"
        )));
    }

    if reader.is_empty() {
        return Ok(OscMessage {
            address,
            args: Vec::new(),
        });
    }

    let tags = reader.read_padded_str()?;
    let mut chars = tags.chars();
    if chars.next() != Some(',') {
        return Err(WireError::MalformedProtocol(format!(
            "type-tag string must begin with ',': {tags:?}"
        )));
    }

    let mut args = Vec::new();
    for tag in chars {
        let value = match tag {
            's' => OscValue::Str(reader.read_padded_str()?),
            'i' => OscValue::Int(reader.read_i32()?),
            'f' => OscValue::Float(reader.read_f32()?),
            'd' => OscValue::Double(reader.read_f64()?),
            'b' => OscValue::Blob(reader.read_blob()?),
            'T' => OscValue::True,
            'F' => OscValue::False,
            'N' => OscValue::Nil,
            other => {
                return Err(WireError::UnsupportedType(format!(
                    "unknown type tag '{other}'"
                )));
            }
        };
        args.push(value);
    }

    Ok(OscMessage { address, args })
}

/// Decode a bundle: verify the `#bundle` tag, read the time tag, then
/// decode length-prefixed elements until the buffer is exhausted.
pub fn decode_bundle(bytes: &[u8]) -> WireResult<OscBundle> {
    let mut reader = Reader::new(bytes);

    let tag = reader.read_padded_str()?;
    if tag != BUNDLE_TAG {
        return Err(WireError::MalformedProtocol(format!(
            "expected '#bundle' tag, got {tag:?}"
        )));
    }

    let seconds = reader.read_u32()?;
    let fraction = reader.read_u32()?;

    let mut elements = Vec::new();
    while !reader.is_empty() {
        let len = reader.read_u32()? as usize;
        let chunk = reader.read_slice(len)?;
        elements.push(decode_packet(chunk)?);
    }

    Ok(OscBundle {
        time_tag: TimeTag::new(seconds, fraction),
        elements,
    })
}

/// Write a null-terminated string padded to 4-byte alignment.
///
/// The padding always contains at least one terminator byte, so a string
/// whose length is already a multiple of 4 grows by a full pad word.
fn put_padded_str(buf: &mut BytesMut, s: &str) -> WireResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(WireError::InvalidArgument(format!(
            "string contains the null terminator: {s:?}"
        )));
    }
    buf.put_slice(s.as_bytes());
    let pad = 4 - (s.len() % 4);
    buf.put_bytes(0, pad);
    Ok(())
}

fn put_blob(buf: &mut BytesMut, bytes: &[u8]) -> WireResult<()> {
    if bytes.len() > i32::MAX as usize {
        return Err(WireError::InvalidArgument(
            "blob exceeds 2^31-1 bytes".into(),
        ));
    }
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    let pad = (4 - (bytes.len() % 4)) % 4;
    buf.put_bytes(0, pad);
    Ok(())
}

/// Cursor over an inbound packet buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_slice(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::MalformedProtocol(format!(
                "need {len} bytes, {} remain",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> WireResult<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_f32(&mut self) -> WireResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_f64(&mut self) -> WireResult<f64> {
        let bytes = self.read_slice(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(raw))
    }

    fn read_padded_str(&mut self) -> WireResult<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| WireError::MalformedProtocol("unterminated string".into()))?;
        let text = std::str::from_utf8(&rest[..nul])
            .map_err(|_| WireError::MalformedProtocol("string is not valid UTF-8".into()))?
            .to_string();
        // consume through the terminator, then to the next 4-byte boundary
        let consumed = (nul + 4) & !3;
        self.pos += consumed.min(rest.len());
        Ok(text)
    }

    fn read_blob(&mut self) -> WireResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_slice(len)?.to_vec();
        let pad = (4 - (len % 4)) % 4;
        if pad > 0 && self.remaining() >= pad {
            self.pos += pad;
        }
        Ok(bytes)
    }
}
