// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::{BleDataType, BleMidiUnwrapper, BleRingBuf, BleRingConsumer, SizeHolder};
use crate::{
    message::{ChannelMessage, MidiMessage, RealTimeMessage, SysCommonMessage, SysExMessage},
    parser::{MidiParser, MidiReadEvent, SerialMidiParser},
};

/// Queue of received BLE-MIDI packet data.
pub trait BleChunkSource {
    /// Release the current chunk and advance to the next one.
    fn next_chunk(&mut self) -> BleDataType;

    /// The data of the current chunk.
    fn current_chunk(&self) -> &[u8];
}

impl<T> BleChunkSource for &mut T
where
    T: BleChunkSource + ?Sized,
{
    fn next_chunk(&mut self) -> BleDataType {
        (**self).next_chunk()
    }

    fn current_chunk(&self) -> &[u8] {
        (**self).current_chunk()
    }
}

impl<const N: usize, S> BleChunkSource for BleRingBuf<N, S>
where
    S: SizeHolder,
{
    fn next_chunk(&mut self) -> BleDataType {
        self.pop()
    }

    fn current_chunk(&self) -> &[u8] {
        self.current().1
    }
}

impl<const N: usize> BleChunkSource for BleRingConsumer<N> {
    fn next_chunk(&mut self) -> BleDataType {
        self.pop()
    }

    fn current_chunk(&self) -> &[u8] {
        self.current().1
    }
}

/// Parses BLE-MIDI packets as they arrive.
///
/// Messages are passed to a handler together with their 13-bit timestamp.
/// SysEx messages that span multiple packets are delivered in chunks.
#[derive(Debug, Clone)]
pub struct BleMidiParser {
    unwrapper: BleMidiUnwrapper,
    parser: SerialMidiParser,
}

impl BleMidiParser {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            unwrapper: BleMidiUnwrapper::new(),
            parser: SerialMidiParser::new(true),
        }
    }

    pub fn parse_packet(&mut self, packet: &[u8], handler: impl FnMut(MidiMessage<'_>, u16)) {
        if !self.unwrapper.begin_packet(packet) {
            return;
        }
        self.parse_chunk(packet, handler);
    }

    /// Parse data that belongs to the previous packet.
    pub fn parse_continuation(&mut self, data: &[u8], handler: impl FnMut(MidiMessage<'_>, u16)) {
        self.unwrapper.begin_continuation();
        self.parse_chunk(data, handler);
    }

    fn parse_chunk(&mut self, data: &[u8], mut handler: impl FnMut(MidiMessage<'_>, u16)) {
        loop {
            let event = self.parser.pull(self.unwrapper.puller(data));
            let Some(message) = self.parser.message(event) else {
                break;
            };
            handler(message, self.unwrapper.timestamp());
        }
    }
}

impl Default for BleMidiParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull parser that reads BLE-MIDI packets from a [`BleChunkSource`].
#[derive(Debug)]
pub struct BufferedBleMidiParser<R> {
    source: R,
    unwrapper: BleMidiUnwrapper,
    parser: SerialMidiParser,
}

impl<R> BufferedBleMidiParser<R>
where
    R: BleChunkSource,
{
    #[must_use]
    pub const fn new(source: R) -> Self {
        Self {
            source,
            unwrapper: BleMidiUnwrapper::new(),
            parser: SerialMidiParser::new(true),
        }
    }

    #[must_use]
    pub const fn source(&self) -> &R {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }

    #[must_use]
    pub fn into_source(self) -> R {
        self.source
    }

    /// Timestamp of the last message.
    #[must_use]
    pub const fn timestamp(&self) -> u16 {
        self.unwrapper.timestamp()
    }

    /// Parse until a message is complete or all chunks are consumed.
    pub fn pull(&mut self) -> MidiReadEvent {
        loop {
            let event = self
                .parser
                .pull(self.unwrapper.puller(self.source.current_chunk()));
            if event != MidiReadEvent::NoMessage {
                return event;
            }
            match self.source.next_chunk() {
                BleDataType::None => return MidiReadEvent::NoMessage,
                BleDataType::Packet => {
                    // Malformed packets are skipped entirely
                    self.unwrapper.begin_packet(self.source.current_chunk());
                }
                BleDataType::Continuation => self.unwrapper.begin_continuation(),
            }
        }
    }
}

impl<R> MidiParser for BufferedBleMidiParser<R> {
    fn channel_message(&self) -> ChannelMessage {
        self.parser.channel_message()
    }

    fn sys_common_message(&self) -> SysCommonMessage {
        self.parser.sys_common_message()
    }

    fn real_time_message(&self) -> RealTimeMessage {
        self.parser.real_time_message()
    }

    fn sysex_message(&self) -> SysExMessage<'_> {
        self.parser.sysex_message()
    }
}
