// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::{BytePuller, MidiParser, MidiReadEvent, SysExBuffer};
use crate::message::{
    has_two_data_bytes, is_channel_status_byte, is_data_byte, is_real_time_byte,
    sys_common_data_len, Cable, ChannelMessage, RealTimeMessage, SysCommonMessage, SysExMessage,
    SYSEX_END, SYSEX_START,
};

/// Parser for MIDI byte streams.
///
/// Used for legacy serial (DIN/UART) MIDI and for the byte stream
/// carried inside BLE-MIDI packets.
#[derive(Debug, Clone)]
pub struct SerialMidiParser {
    /// BLE-MIDI: system messages do not cancel running status.
    ble_mode: bool,
    channel_message: ChannelMessage,
    sys_common_message: SysCommonMessage,
    real_time_message: RealTimeMessage,
    sysex: SysExBuffer,
    /// Status of the message currently being parsed, 0 if none.
    current_header: u8,
    /// Status for data bytes without a preceding status byte, 0 if none.
    running_header: u8,
    third_byte: bool,
    /// A byte that has been pulled but could not be handled yet.
    stored_byte: Option<u8>,
}

impl SerialMidiParser {
    #[must_use]
    pub const fn new(ble_mode: bool) -> Self {
        Self {
            ble_mode,
            channel_message: ChannelMessage::new(0, 0, 0, Cable::CABLE_1),
            sys_common_message: SysCommonMessage::new(0, 0, 0, Cable::CABLE_1),
            real_time_message: RealTimeMessage::new(0, Cable::CABLE_1),
            sysex: SysExBuffer::new(),
            current_header: 0,
            running_header: 0,
            third_byte: false,
            stored_byte: None,
        }
    }

    #[must_use]
    pub const fn is_ble_mode(&self) -> bool {
        self.ble_mode
    }

    /// The status byte that is applied to subsequent data bytes.
    #[must_use]
    pub const fn running_status(&self) -> Option<u8> {
        if self.running_header == 0 {
            None
        } else {
            Some(self.running_header)
        }
    }

    /// Parse bytes until a message is complete or `puller` runs dry.
    pub fn pull(&mut self, mut puller: impl BytePuller) -> MidiReadEvent {
        let event = self.resume();
        if event != MidiReadEvent::NoMessage {
            return event;
        }
        while let Some(byte) = puller.pull_byte() {
            let event = self.feed(byte);
            if event != MidiReadEvent::NoMessage {
                return event;
            }
        }
        MidiReadEvent::NoMessage
    }

    fn resume(&mut self) -> MidiReadEvent {
        let Some(byte) = self.stored_byte.take() else {
            return MidiReadEvent::NoMessage;
        };
        self.feed(byte)
    }

    fn feed(&mut self, byte: u8) -> MidiReadEvent {
        let event = if is_data_byte(byte) {
            self.handle_data(byte)
        } else if is_real_time_byte(byte) {
            self.real_time_message = RealTimeMessage::new(byte, Cable::CABLE_1);
            MidiReadEvent::RealTimeMessage
        } else {
            self.handle_non_real_time_status(byte)
        };
        if event != MidiReadEvent::NoMessage {
            log::trace!("Parsed {event:?} after {byte:02x}");
        }
        event
    }

    fn handle_non_real_time_status(&mut self, status: u8) -> MidiReadEvent {
        if self.sysex.is_receiving() {
            return self.terminate_sysex(status);
        }
        match status {
            SYSEX_END => {
                log::debug!("Ignoring SysEx end without start");
                MidiReadEvent::NoMessage
            }
            SYSEX_START => {
                self.running_header = 0;
                self.current_header = SYSEX_START;
                self.third_byte = false;
                self.sysex.start();
                self.sysex.add(SYSEX_START);
                MidiReadEvent::NoMessage
            }
            _ if is_channel_status_byte(status) => {
                self.running_header = status;
                self.current_header = status;
                self.third_byte = false;
                MidiReadEvent::NoMessage
            }
            _ => self.handle_sys_common_status(status),
        }
    }

    fn terminate_sysex(&mut self, status: u8) -> MidiReadEvent {
        debug_assert_eq!(SYSEX_START, self.current_header);
        if status == SYSEX_END {
            if !self.sysex.has_space_left(1) {
                self.sysex.emit_chunk();
                self.stored_byte = Some(status);
                return MidiReadEvent::SysExChunk;
            }
            self.sysex.add(SYSEX_END);
        } else {
            // Implicit end, the status byte is handled on the next pull
            log::debug!("SysEx terminated by status {status:02x}");
            self.stored_byte = Some(status);
        }
        self.sysex.end();
        self.current_header = self.running_header;
        MidiReadEvent::SysExMessage
    }

    fn handle_sys_common_status(&mut self, status: u8) -> MidiReadEvent {
        if !self.ble_mode {
            self.running_header = 0;
        }
        self.third_byte = false;
        if sys_common_data_len(status) == 0 {
            self.sys_common_message = SysCommonMessage::new(status, 0, 0, Cable::CABLE_1);
            self.current_header = self.running_header;
            return MidiReadEvent::SysCommonMessage;
        }
        self.current_header = status;
        MidiReadEvent::NoMessage
    }

    fn handle_data(&mut self, data: u8) -> MidiReadEvent {
        match self.current_header {
            0 => {
                log::debug!("Ignoring data byte {data:02x} without status");
                MidiReadEvent::NoMessage
            }
            SYSEX_START => {
                if !self.sysex.has_space_left(1) {
                    self.sysex.emit_chunk();
                    self.stored_byte = Some(data);
                    return MidiReadEvent::SysExChunk;
                }
                self.sysex.add(data);
                MidiReadEvent::NoMessage
            }
            header if is_channel_status_byte(header) => self.handle_channel_data(header, data),
            header => self.handle_sys_common_data(header, data),
        }
    }

    fn handle_channel_data(&mut self, header: u8, data: u8) -> MidiReadEvent {
        if self.third_byte {
            self.channel_message.data2 = data;
            self.third_byte = false;
            return MidiReadEvent::ChannelMessage;
        }
        self.channel_message = ChannelMessage::new(header, data, 0, Cable::CABLE_1);
        if has_two_data_bytes(header) {
            self.third_byte = true;
            return MidiReadEvent::NoMessage;
        }
        MidiReadEvent::ChannelMessage
    }

    fn handle_sys_common_data(&mut self, header: u8, data: u8) -> MidiReadEvent {
        if self.third_byte {
            self.sys_common_message.data2 = data;
            self.third_byte = false;
        } else {
            self.sys_common_message = SysCommonMessage::new(header, data, 0, Cable::CABLE_1);
            if sys_common_data_len(header) == 2 {
                self.third_byte = true;
                return MidiReadEvent::NoMessage;
            }
        }
        self.current_header = self.running_header;
        MidiReadEvent::SysCommonMessage
    }
}

impl Default for SerialMidiParser {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MidiParser for SerialMidiParser {
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
        SysExMessage::chunk(
            self.sysex.as_slice(),
            Cable::CABLE_1,
            self.sysex.is_first_chunk(),
            !self.sysex.is_receiving(),
        )
    }
}

#[cfg(test)]
mod tests;
