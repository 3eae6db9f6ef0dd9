// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! Pull-based MIDI parsers
//!
//! Each parser consumes input from a pull source until it has assembled
//! a complete event or the source runs dry. Parsing never blocks and
//! keeps its state between calls, so input may be split arbitrarily.

use crate::message::{ChannelMessage, MidiMessage, RealTimeMessage, SysCommonMessage, SysExMessage};

mod hex;
pub use self::hex::HexPuller;

mod serial;
pub use self::serial::SerialMidiParser;

mod sysex_buffer;
pub(crate) use self::sysex_buffer::SysExBuffer;

#[cfg(feature = "usb")]
mod usb;
#[cfg(feature = "usb")]
pub use self::usb::{
    CodeIndexNumber, UsbMidiPacket, UsbMidiParser, UsbPacketPuller, USB_MIDI_NUMBER_OF_CABLES,
};

/// Capacity of the SysEx chunk buffers
pub const SYSEX_BUFFER_SIZE: usize = 128;

/// Outcome of a single pull operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiReadEvent {
    /// Nothing available without more input.
    NoMessage,
    ChannelMessage,
    /// An incomplete part of a SysEx message.
    SysExChunk,
    /// The final part of a SysEx message.
    SysExMessage,
    RealTimeMessage,
    SysCommonMessage,
}

/// Access to the last message that has been parsed.
///
/// The getters are only meaningful after the corresponding
/// [`MidiReadEvent`] has been returned.
pub trait MidiParser {
    fn channel_message(&self) -> ChannelMessage;

    fn sys_common_message(&self) -> SysCommonMessage;

    fn real_time_message(&self) -> RealTimeMessage;

    fn sysex_message(&self) -> SysExMessage<'_>;

    /// The message that belongs to `event`.
    fn message(&self, event: MidiReadEvent) -> Option<MidiMessage<'_>> {
        let message = match event {
            MidiReadEvent::NoMessage => return None,
            MidiReadEvent::ChannelMessage => self.channel_message().into(),
            MidiReadEvent::SysExChunk | MidiReadEvent::SysExMessage => {
                self.sysex_message().into()
            }
            MidiReadEvent::RealTimeMessage => self.real_time_message().into(),
            MidiReadEvent::SysCommonMessage => self.sys_common_message().into(),
        };
        Some(message)
    }
}

/// Source of single bytes.
pub trait BytePuller {
    /// Take the next byte, if any.
    fn pull_byte(&mut self) -> Option<u8>;
}

impl<P> BytePuller for &mut P
where
    P: BytePuller + ?Sized,
{
    fn pull_byte(&mut self) -> Option<u8> {
        (**self).pull_byte()
    }
}

/// Consumes bytes from the front of the slice.
impl BytePuller for &[u8] {
    fn pull_byte(&mut self) -> Option<u8> {
        let (&byte, rest) = self.split_first()?;
        *self = rest;
        Some(byte)
    }
}

/// Adapts any byte iterator.
#[derive(Debug, Clone)]
pub struct IterPuller<I>(pub I);

impl<I> BytePuller for IterPuller<I>
where
    I: Iterator<Item = u8>,
{
    fn pull_byte(&mut self) -> Option<u8> {
        self.0.next()
    }
}
