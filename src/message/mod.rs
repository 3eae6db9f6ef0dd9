// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! MIDI message model
//!
//! Plain value types for the four categories of MIDI events: channel
//! messages, system common messages, real-time messages and system
//! exclusive (SysEx) messages. The latter only borrow their payload.

use std::fmt;

use enum_as_inner::EnumAsInner;
use strum::{EnumCount, EnumIter, FromRepr};

/// Start of a system exclusive message
pub const SYSEX_START: u8 = 0xF0;

/// End of a system exclusive message
pub const SYSEX_END: u8 = 0xF7;

/// Status bytes have the most significant bit set.
#[must_use]
pub const fn is_status_byte(byte: u8) -> bool {
    byte & 0x80 != 0
}

#[must_use]
pub const fn is_data_byte(byte: u8) -> bool {
    !is_status_byte(byte)
}

/// Real-time bytes may appear anywhere in the byte stream.
#[must_use]
pub const fn is_real_time_byte(byte: u8) -> bool {
    byte >= 0xF8
}

#[must_use]
pub const fn is_channel_status_byte(byte: u8) -> bool {
    matches!(byte, 0x80..=0xEF)
}

/// System common status bytes, excluding the SysEx boundaries.
#[must_use]
pub const fn is_sys_common_byte(byte: u8) -> bool {
    matches!(byte, 0xF1..=0xF6)
}

/// All MIDI status bytes.
///
/// Channel message types are stored with a channel nibble of 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum MidiMessageType {
    NoteOff = 0x80,
    NoteOn = 0x90,
    KeyPressure = 0xA0,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
    ChannelPressure = 0xD0,
    PitchBend = 0xE0,
    SysExStart = 0xF0,
    MtcQuarterFrame = 0xF1,
    SongPositionPointer = 0xF2,
    SongSelect = 0xF3,
    UndefinedSysCommon1 = 0xF4,
    UndefinedSysCommon2 = 0xF5,
    TuneRequest = 0xF6,
    SysExEnd = 0xF7,
    TimingClock = 0xF8,
    UndefinedRealTime1 = 0xF9,
    Start = 0xFA,
    Continue = 0xFB,
    Stop = 0xFC,
    UndefinedRealTime2 = 0xFD,
    ActiveSensing = 0xFE,
    SystemReset = 0xFF,
}

impl MidiMessageType {
    /// Classify a status byte.
    ///
    /// The channel nibble of channel messages is ignored. Returns `None`
    /// for data bytes.
    #[must_use]
    pub const fn from_status(status: u8) -> Option<Self> {
        if is_data_byte(status) {
            return None;
        }
        if is_channel_status_byte(status) {
            Self::from_repr(status & 0xF0)
        } else {
            Self::from_repr(status)
        }
    }

    #[must_use]
    pub const fn is_channel_message(self) -> bool {
        (self as u8) < 0xF0
    }

    #[must_use]
    pub const fn is_real_time(self) -> bool {
        is_real_time_byte(self as u8)
    }
}

/// A virtual USB-MIDI cable, 0-based.
///
/// USB-MIDI multiplexes up to 16 cables over a single endpoint.
/// All other transports only use the first cable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Cable(u8);

impl Cable {
    pub const COUNT: u8 = 16;

    pub const CABLE_1: Self = Self(0);

    /// Create a cable from its 0-based index.
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Create a cable from the low nibble of a byte.
    #[must_use]
    pub const fn from_nibble(nibble: u8) -> Self {
        Self(nibble & 0x0F)
    }

    /// 0-based index
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// 1-based number as printed on devices
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0 + 1
    }
}

impl fmt::Display for Cable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cable {}", self.number())
    }
}

/// A MIDI channel, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Channel(u8);

impl Channel {
    pub const COUNT: u8 = 16;

    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn from_nibble(nibble: u8) -> Self {
        Self(nibble & 0x0F)
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMessage {
    /// Message type in the upper and channel in the lower nibble
    pub header: u8,
    pub data1: u8,
    /// Unused by program change and channel pressure
    pub data2: u8,
    pub cable: Cable,
}

impl ChannelMessage {
    #[must_use]
    pub const fn new(header: u8, data1: u8, data2: u8, cable: Cable) -> Self {
        Self {
            header,
            data1,
            data2,
            cable,
        }
    }

    #[must_use]
    pub const fn message_type(&self) -> Option<MidiMessageType> {
        MidiMessageType::from_status(self.header)
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        Channel::from_nibble(self.header)
    }

    #[must_use]
    pub const fn has_two_data_bytes(&self) -> bool {
        has_two_data_bytes(self.header)
    }

    /// Combine both data bytes into a 14-bit value, LSB first.
    #[must_use]
    pub fn data14bit(&self) -> u16 {
        u16::from(self.data1) | (u16::from(self.data2) << 7)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn set_data14bit(&mut self, value: u16) {
        self.data1 = (value & 0x7F) as u8;
        self.data2 = ((value >> 7) & 0x7F) as u8;
    }

    /// Force the status bit and clear the MSB of the data bytes.
    ///
    /// The unused second data byte of 2-byte messages is zeroed.
    pub fn sanitize(&mut self) {
        self.header |= 0x80;
        self.data1 &= 0x7F;
        self.data2 = if self.has_two_data_bytes() {
            self.data2 & 0x7F
        } else {
            0
        };
    }
}

/// Channel messages with two data bytes: note off/on, key pressure,
/// control change, and pitch bend.
pub(crate) const fn has_two_data_bytes(status: u8) -> bool {
    let kind = status & 0xF0;
    kind <= 0xB0 || kind == 0xE0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SysCommonMessage {
    pub header: u8,
    pub data1: u8,
    pub data2: u8,
    pub cable: Cable,
}

impl SysCommonMessage {
    #[must_use]
    pub const fn new(header: u8, data1: u8, data2: u8, cable: Cable) -> Self {
        Self {
            header,
            data1,
            data2,
            cable,
        }
    }

    #[must_use]
    pub const fn message_type(&self) -> Option<MidiMessageType> {
        MidiMessageType::from_repr(self.header)
    }

    #[must_use]
    pub const fn number_of_data_bytes(&self) -> u8 {
        sys_common_data_len(self.header)
    }

    #[must_use]
    pub fn data14bit(&self) -> u16 {
        u16::from(self.data1) | (u16::from(self.data2) << 7)
    }
}

/// Number of data bytes that follow a system common status byte.
pub(crate) const fn sys_common_data_len(status: u8) -> u8 {
    match status {
        0xF2 => 2,
        0xF1 | 0xF3 => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RealTimeMessage {
    pub message: u8,
    pub cable: Cable,
}

impl RealTimeMessage {
    #[must_use]
    pub const fn new(message: u8, cable: Cable) -> Self {
        Self { message, cable }
    }

    #[must_use]
    pub const fn message_type(&self) -> Option<MidiMessageType> {
        MidiMessageType::from_repr(self.message)
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        is_real_time_byte(self.message)
    }
}

/// A borrowed chunk of a system exclusive message.
///
/// Long messages arrive in multiple chunks. Only the first chunk starts
/// with [`SYSEX_START`]. The last chunk usually ends with [`SYSEX_END`],
/// unless the message was terminated implicitly by another status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysExMessage<'a> {
    pub data: &'a [u8],
    pub cable: Cable,
    first_chunk: bool,
    last_chunk: bool,
}

impl<'a> SysExMessage<'a> {
    /// Create a message and derive the chunk flags from the boundary bytes.
    #[must_use]
    pub fn new(data: &'a [u8], cable: Cable) -> Self {
        let first_chunk = data.first() == Some(&SYSEX_START);
        let last_chunk = data.last() == Some(&SYSEX_END);
        Self {
            data,
            cable,
            first_chunk,
            last_chunk,
        }
    }

    #[must_use]
    pub const fn chunk(data: &'a [u8], cable: Cable, first_chunk: bool, last_chunk: bool) -> Self {
        Self {
            data,
            cable,
            first_chunk,
            last_chunk,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn is_first_chunk(&self) -> bool {
        self.first_chunk
    }

    #[must_use]
    pub const fn is_last_chunk(&self) -> bool {
        self.last_chunk
    }

    #[must_use]
    pub const fn is_complete_message(&self) -> bool {
        self.first_chunk && self.last_chunk
    }
}

/// Any MIDI message, with a borrowed SysEx payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumAsInner, derive_more::From)]
pub enum MidiMessage<'a> {
    Channel(ChannelMessage),
    SysCommon(SysCommonMessage),
    RealTime(RealTimeMessage),
    SysEx(SysExMessage<'a>),
}

impl MidiMessage<'_> {
    #[must_use]
    pub const fn cable(&self) -> Cable {
        match self {
            Self::Channel(msg) => msg.cable,
            Self::SysCommon(msg) => msg.cable,
            Self::RealTime(msg) => msg.cable,
            Self::SysEx(msg) => msg.cable,
        }
    }
}
