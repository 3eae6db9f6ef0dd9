// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! MIDI over Bluetooth Low Energy
//!
//! BLE-MIDI packets start with a header byte carrying the upper 6 bits
//! of a 13-bit millisecond timestamp. Every message group is preceded by
//! a timestamp byte with the lower 7 bits, unless running status allows
//! to omit it.

use strum::FromRepr;

mod packet_builder;
pub use self::packet_builder::{
    BleMidiPacketBuilder, CapacityError, BLE_MIDI_DEFAULT_CAPACITY, BLE_MIDI_MAX_CAPACITY,
    BLE_MIDI_MIN_CAPACITY,
};

mod parser;
pub use self::parser::{BleChunkSource, BleMidiParser, BufferedBleMidiParser};

mod ring_buf;
pub use self::ring_buf::{
    AtomicSize, BleRingBuf, BleRingConsumer, BleRingProducer, NonAtomicSize, SizeHolder,
    MAX_CHUNK_LEN,
};

mod sender;
pub use self::sender::{
    BlePacketSink, PollingBleMidiSender, DEFAULT_ATT_MTU, DEFAULT_SEND_TIMEOUT,
};

mod unwrapper;
pub use self::unwrapper::{BleMidiUnwrapper, UnwrapPuller};


/// Timestamps wrap around after 8192 ms.
pub const TIMESTAMP_MASK: u16 = 0x1FFF;

/// ATT protocol overhead that is subtracted from the MTU.
pub const ATT_OVERHEAD: u16 = 3;

/// The packet header byte for a timestamp.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn timestamp_header(timestamp: u16) -> u8 {
    0x80 | ((timestamp >> 7) & 0x3F) as u8
}

/// The per-message timestamp byte.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn timestamp_lsb(timestamp: u16) -> u8 {
    0x80 | (timestamp & 0x7F) as u8
}

/// Kind of a chunk in the [`BleRingBuf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRepr)]
#[repr(u8)]
pub enum BleDataType {
    /// No data available.
    #[default]
    None = 0,
    /// Start of a BLE packet.
    Packet = 1,
    /// Continuation of the previous packet.
    Continuation = 2,
}
