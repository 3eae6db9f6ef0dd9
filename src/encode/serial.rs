// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use crate::message::{ChannelMessage, MidiMessage, SysCommonMessage};

/// Encodes messages into a serial MIDI byte stream.
#[derive(Debug, Clone, Default)]
pub struct SerialMidiEncoder {
    running_status: bool,
    /// Status of the last channel message, 0 if none.
    running_header: u8,
}

impl SerialMidiEncoder {
    /// Omit repeated channel status bytes if `running_status` is enabled.
    #[must_use]
    pub const fn new(running_status: bool) -> Self {
        Self {
            running_status,
            running_header: 0,
        }
    }

    /// Forget the running status, e.g. after reconnecting.
    pub fn reset(&mut self) {
        self.running_header = 0;
    }

    /// Append the encoded message to `output`.
    pub fn encode(&mut self, message: &MidiMessage<'_>, output: &mut Vec<u8>) {
        match message {
            MidiMessage::Channel(msg) => self.encode_channel_message(*msg, output),
            MidiMessage::SysCommon(msg) => self.encode_sys_common(*msg, output),
            MidiMessage::RealTime(msg) => {
                // Real-time messages may interrupt anything, including running status
                output.push(msg.message);
            }
            MidiMessage::SysEx(msg) => {
                self.running_header = 0;
                output.extend_from_slice(msg.data);
            }
        }
    }

    fn encode_channel_message(&mut self, message: ChannelMessage, output: &mut Vec<u8>) {
        if !self.running_status || message.header != self.running_header {
            output.push(message.header);
            self.running_header = message.header;
        }
        output.push(message.data1);
        if message.has_two_data_bytes() {
            output.push(message.data2);
        }
    }

    fn encode_sys_common(&mut self, message: SysCommonMessage, output: &mut Vec<u8>) {
        self.running_header = 0;
        output.push(message.header);
        let data = [message.data1, message.data2];
        output.extend_from_slice(&data[..usize::from(message.number_of_data_bytes())]);
    }
}
