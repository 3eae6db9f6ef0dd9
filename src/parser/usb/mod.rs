// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use strum::{EnumCount, EnumIter, FromRepr};

use super::{MidiParser, MidiReadEvent, SysExBuffer};
use crate::message::{
    is_real_time_byte, is_sys_common_byte, sys_common_data_len, Cable, ChannelMessage, RealTimeMessage, SysCommonMessage, SysExMessage,
    SYSEX_END, SYSEX_START,
};

/// A 4-byte USB-MIDI event packet.
///
/// Byte 0 carries the cable number in the upper and the code index
/// number in the lower nibble. Bytes 1..4 carry the MIDI bytes.
pub type UsbMidiPacket = [u8; 4];

/// Number of virtual cables with independent SysEx state.
pub const USB_MIDI_NUMBER_OF_CABLES: usize = Cable::COUNT as usize;

/// USB-MIDI code index number (CIN)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum CodeIndexNumber {
    MiscFunctionCodes = 0x0,
    CableEvents = 0x1,
    SystemCommon2B = 0x2,
    SystemCommon3B = 0x3,
    SysExStartCont = 0x4,
    /// Also used for single-byte system common messages.
    SysExEnd1B = 0x5,
    SysExEnd2B = 0x6,
    SysExEnd3B = 0x7,
    NoteOff = 0x8,
    NoteOn = 0x9,
    KeyPressure = 0xA,
    ControlChange = 0xB,
    ProgramChange = 0xC,
    ChannelPressure = 0xD,
    PitchBend = 0xE,
    SingleByte = 0xF,
}

impl CodeIndexNumber {
    #[must_use]
    pub const fn from_packet(packet: &UsbMidiPacket) -> Self {
        match Self::from_repr(packet[0] & 0x0F) {
            Some(cin) => cin,
            // All 16 values are covered
            None => Self::MiscFunctionCodes,
        }
    }

    /// Code index number for a channel message status byte.
    #[must_use]
    pub const fn from_channel_status(status: u8) -> Option<Self> {
        match status >> 4 {
            nibble @ 0x8..=0xE => Self::from_repr(nibble),
            _ => None,
        }
    }
}

/// Source of USB-MIDI event packets.
pub trait UsbPacketPuller {
    fn pull_packet(&mut self) -> Option<UsbMidiPacket>;
}

impl<P> UsbPacketPuller for &mut P
where
    P: UsbPacketPuller + ?Sized,
{
    fn pull_packet(&mut self) -> Option<UsbMidiPacket> {
        (**self).pull_packet()
    }
}

/// Consumes packets from the front of the slice.
///
/// An all-zero packet signals that no more packets are available.
impl UsbPacketPuller for &[UsbMidiPacket] {
    fn pull_packet(&mut self) -> Option<UsbMidiPacket> {
        let (&packet, rest) = self.split_first()?;
        *self = rest;
        (packet != [0; 4]).then_some(packet)
    }
}

/// Parser for USB-MIDI event packets.
#[derive(Debug, Clone)]
pub struct UsbMidiParser {
    channel_message: ChannelMessage,
    sys_common_message: SysCommonMessage,
    real_time_message: RealTimeMessage,
    sysex_buffers: [SysExBuffer; USB_MIDI_NUMBER_OF_CABLES],
    /// Cable of the last SysEx event
    active_cable: Cable,
    stored_packet: Option<UsbMidiPacket>,
}

impl UsbMidiParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_message: Default::default(),
            sys_common_message: Default::default(),
            real_time_message: Default::default(),
            sysex_buffers: std::array::from_fn(|_| SysExBuffer::new()),
            active_cable: Cable::CABLE_1,
            stored_packet: None,
        }
    }

    /// Parse packets until a message is complete or `puller` runs dry.
    pub fn pull(&mut self, mut puller: impl UsbPacketPuller) -> MidiReadEvent {
        if let Some(packet) = self.stored_packet.take() {
            let event = self.feed(packet);
            if event != MidiReadEvent::NoMessage {
                return event;
            }
        }
        while let Some(packet) = puller.pull_packet() {
            let event = self.feed(packet);
            if event != MidiReadEvent::NoMessage {
                return event;
            }
        }
        MidiReadEvent::NoMessage
    }

    fn feed(&mut self, packet: UsbMidiPacket) -> MidiReadEvent {
        let cable = Cable::from_nibble(packet[0] >> 4);
        let event = match CodeIndexNumber::from_packet(&packet) {
            CodeIndexNumber::MiscFunctionCodes | CodeIndexNumber::CableEvents => {
                log::debug!("Ignoring reserved USB-MIDI packet {packet:02x?}");
                MidiReadEvent::NoMessage
            }
            CodeIndexNumber::SystemCommon2B | CodeIndexNumber::SystemCommon3B => {
                self.sys_common_message =
                    SysCommonMessage::new(packet[1], packet[2], packet[3], cable);
                MidiReadEvent::SysCommonMessage
            }
            CodeIndexNumber::SysExStartCont => self.handle_sysex_start_cont(packet, cable),
            CodeIndexNumber::SysExEnd1B => {
                if packet[1] == SYSEX_END {
                    self.handle_sysex_end(packet, cable, 1)
                } else {
                    self.sys_common_message = SysCommonMessage::new(packet[1], 0, 0, cable);
                    MidiReadEvent::SysCommonMessage
                }
            }
            CodeIndexNumber::SysExEnd2B => self.handle_sysex_end(packet, cable, 2),
            CodeIndexNumber::SysExEnd3B => self.handle_sysex_end(packet, cable, 3),
            CodeIndexNumber::NoteOff
            | CodeIndexNumber::NoteOn
            | CodeIndexNumber::KeyPressure
            | CodeIndexNumber::ControlChange
            | CodeIndexNumber::ProgramChange
            | CodeIndexNumber::ChannelPressure
            | CodeIndexNumber::PitchBend => {
                self.channel_message = ChannelMessage::new(packet[1], packet[2], packet[3], cable);
                MidiReadEvent::ChannelMessage
            }
            CodeIndexNumber::SingleByte => self.handle_single_byte(packet, cable),
        };
        if event != MidiReadEvent::NoMessage {
            log::trace!("Parsed {event:?} from {packet:02x?}");
        }
        event
    }

    fn handle_single_byte(&mut self, packet: UsbMidiPacket, cable: Cable) -> MidiReadEvent {
        let byte = packet[1];
        if is_real_time_byte(byte) {
            self.real_time_message = RealTimeMessage::new(byte, cable);
            return MidiReadEvent::RealTimeMessage;
        }
        // Some devices send tune requests as single bytes
        if is_sys_common_byte(byte) && sys_common_data_len(byte) == 0 {
            self.sys_common_message = SysCommonMessage::new(byte, 0, 0, cable);
            return MidiReadEvent::SysCommonMessage;
        }
        log::debug!("Ignoring single byte {byte:02x} on {cable}");
        MidiReadEvent::NoMessage
    }

    fn handle_sysex_start_cont(&mut self, packet: UsbMidiPacket, cable: Cable) -> MidiReadEvent {
        let buffer = &mut self.sysex_buffers[usize::from(cable.index())];
        if packet[1] == SYSEX_START {
            // Any unfinished message on this cable is discarded
            buffer.start();
        } else if !buffer.is_receiving() {
            log::debug!("Ignoring SysEx continuation without start on {cable}");
            return MidiReadEvent::NoMessage;
        }
        if !buffer.has_space_left(3) {
            return self.emit_chunk(packet, cable);
        }
        buffer.add_slice(&packet[1..4]);
        MidiReadEvent::NoMessage
    }

    fn handle_sysex_end(&mut self, packet: UsbMidiPacket, cable: Cable, len: usize) -> MidiReadEvent {
        let buffer = &mut self.sysex_buffers[usize::from(cable.index())];
        if packet[1] == SYSEX_START {
            buffer.start();
        } else if !buffer.is_receiving() {
            log::debug!("Ignoring SysEx end without start on {cable}");
            return MidiReadEvent::NoMessage;
        }
        if !buffer.has_space_left(len) {
            return self.emit_chunk(packet, cable);
        }
        buffer.add_slice(&packet[1..=len]);
        buffer.end();
        self.active_cable = cable;
        MidiReadEvent::SysExMessage
    }

    /// Hand out the full buffer and process `packet` again on the next pull.
    fn emit_chunk(&mut self, packet: UsbMidiPacket, cable: Cable) -> MidiReadEvent {
        self.sysex_buffers[usize::from(cable.index())].emit_chunk();
        self.active_cable = cable;
        self.stored_packet = Some(packet);
        MidiReadEvent::SysExChunk
    }
}

impl Default for UsbMidiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiParser for UsbMidiParser {
    fn channel_message(&self) -> ChannelMessage {
        self.channel_message
    }

    fn sys_common_message(&self) -> SysCommonMessage {
        self.sys_common_message
    }

    fn real_time_message(&self) -> RealTimeMessage {
        self.real_time_message
    }

    fn sysex_message(&self) -> SysExMessage<'_> {
        let buffer = &self.sysex_buffers[usize::from(self.active_cable.index())];
        SysExMessage::chunk(
            buffer.as_slice(),
            self.active_cable,
            buffer.is_first_chunk(),
            !buffer.is_receiving(),
        )
    }
}
