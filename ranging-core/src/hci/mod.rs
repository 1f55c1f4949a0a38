//! HCI wire format for the LE Channel Sounding commands and events.
//!
//! Inbound LE Meta sub-events are decoded with `winnow`'s little-endian
//! binary parsers into borrowed [`CsEvent`](crate::events::CsEvent) values.
//! Outbound commands are encoded into fixed-capacity packets:
//! opcode (LE), parameter length, parameters.

use core::fmt;

use heapless::Vec;

use crate::events::CsEventKind;

mod command;
mod event;

pub use command::{COMMAND_HEADER_LEN, CommandPacket, CsCommand, MAX_COMMAND_LEN};
pub use event::{EventPacket, LE_META_EVENT, MAX_EVENT_LEN, decode_event, decode_subevent, encode_event};

/// Errors raised while decoding an inbound packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The packet is not an LE Meta event.
    NotLeMeta(u8),
    /// The declared parameter length does not match the packet.
    LengthMismatch { declared: u8, actual: usize },
    /// The sub-event code is not a CS event.
    UnknownSubevent(u8),
    /// The payload ended before every field was read.
    Truncated(CsEventKind),
    /// A connection handle outside 0x0000..=0x0EFF.
    InvalidHandle(u16),
    /// An enumerated field carried a reserved value.
    InvalidField(CsEventKind),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotLeMeta(code) => write!(f, "event 0x{code:02x} is not LE Meta"),
            DecodeError::LengthMismatch { declared, actual } => {
                write!(f, "declared length {declared} but {actual} bytes present")
            }
            DecodeError::UnknownSubevent(code) => write!(f, "unknown sub-event 0x{code:02x}"),
            DecodeError::Truncated(kind) => write!(f, "{kind} truncated"),
            DecodeError::InvalidHandle(raw) => write!(f, "invalid connection handle 0x{raw:04x}"),
            DecodeError::InvalidField(kind) => write!(f, "{kind} carries a reserved value"),
        }
    }
}

/// Errors raised while encoding an outbound packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The packet does not fit the fixed-capacity buffer.
    Overflow,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Overflow => f.write_str("packet exceeds buffer capacity"),
        }
    }
}

/// Little-endian packet builder over a `heapless::Vec`.
pub(crate) struct PacketWriter<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> PacketWriter<N> {
    pub(crate) const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<(), EncodeError> {
        self.buf.push(value).map_err(|_| EncodeError::Overflow)
    }

    pub(crate) fn i8(&mut self, value: i8) -> Result<(), EncodeError> {
        self.slice(&value.to_le_bytes())
    }

    pub(crate) fn u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.slice(&value.to_le_bytes())
    }

    /// Writes the low 24 bits of `value`.
    pub(crate) fn u24(&mut self, value: u32) -> Result<(), EncodeError> {
        let bytes = value.to_le_bytes();
        self.slice(&bytes[..3])
    }

    pub(crate) fn slice(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| EncodeError::Overflow)
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Overwrites the byte at `index`, which must already be written.
    pub(crate) fn patch(&mut self, index: usize, value: u8) -> Result<(), EncodeError> {
        let slot = self.buf.get_mut(index).ok_or(EncodeError::Overflow)?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn finish(self) -> Vec<u8, N> {
        self.buf
    }
}

/// Patches the one-byte parameter length at `index` to cover the rest of the packet.
pub(crate) fn patch_length<const N: usize>(
    writer: &mut PacketWriter<N>,
    index: usize,
) -> Result<(), EncodeError> {
    let params = writer.len().saturating_sub(index + 1);
    let params = u8::try_from(params).map_err(|_| EncodeError::Overflow)?;
    writer.patch(index, params)
}
