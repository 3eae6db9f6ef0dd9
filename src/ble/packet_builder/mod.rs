// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

use super::{timestamp_header, timestamp_lsb};
use crate::message::{
    ChannelMessage, MidiMessage, RealTimeMessage, SysCommonMessage, SYSEX_END, SYSEX_START,
};

/// Smallest packet that fits the header plus any non-SysEx message.
pub const BLE_MIDI_MIN_CAPACITY: usize = 5;

/// Payload of the default ATT MTU of 23 bytes.
pub const BLE_MIDI_MAX_CAPACITY: usize = 20;

pub const BLE_MIDI_DEFAULT_CAPACITY: usize = BLE_MIDI_MAX_CAPACITY;

/// Running timestamp after real-time and system common messages.
///
/// Valid timestamp bytes always have the MSB set.
const INVALID_TIMESTAMP: u8 = 0x00;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid BLE-MIDI packet capacity {capacity}, must be within [{BLE_MIDI_MIN_CAPACITY}, {BLE_MIDI_MAX_CAPACITY}]")]
pub struct CapacityError {
    pub capacity: usize,
}

/// Assembles outgoing BLE-MIDI packets.
///
/// All `add_*` operations either append the complete message or leave
/// the packet untouched and return `false`. The caller is then expected
/// to send the packet, [`reset()`](Self::reset) the builder, and retry.
#[derive(Debug, Clone)]
pub struct BleMidiPacketBuilder {
    buffer: Vec<u8>,
    capacity: usize,
    /// Status of the last channel message, 0 if none.
    running_header: u8,
    running_timestamp: u8,
    /// The packet ends with SysEx data that has not been terminated.
    sysex_open: bool,
}

impl BleMidiPacketBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(BLE_MIDI_MAX_CAPACITY),
            capacity: BLE_MIDI_DEFAULT_CAPACITY,
            running_header: 0,
            running_timestamp: INVALID_TIMESTAMP,
            sysex_open: false,
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        let mut builder = Self::new();
        builder.set_capacity(capacity)?;
        Ok(builder)
    }

    /// Set the maximum packet size.
    ///
    /// The current packet is not truncated. Shrinking the capacity below
    /// its length only prevents further additions.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), CapacityError> {
        if !(BLE_MIDI_MIN_CAPACITY..=BLE_MIDI_MAX_CAPACITY).contains(&capacity) {
            return Err(CapacityError { capacity });
        }
        self.capacity = capacity;
        Ok(())
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start a new packet.
    ///
    /// The running timestamp is preserved.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.running_header = 0;
        self.sysex_open = false;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn packet(&self) -> &[u8] {
        &self.buffer
    }

    pub fn add_channel_message(&mut self, message: ChannelMessage, timestamp: u16) -> bool {
        let data = [message.data1, message.data2];
        let data = if message.has_two_data_bytes() {
            &data[..]
        } else {
            &data[..1]
        };
        self.add_channel_message_bytes(message.header, data, timestamp)
    }

    pub fn add_real_time(&mut self, message: RealTimeMessage, timestamp: u16) -> bool {
        if !self.has_space_for(self.header_len() + 2) {
            return false;
        }
        self.init_packet(timestamp);
        self.buffer
            .extend_from_slice(&[timestamp_lsb(timestamp), message.message]);
        // The next message must carry its own timestamp
        self.running_timestamp = INVALID_TIMESTAMP;
        true
    }

    /// System common messages never use running status and leave the
    /// running status of channel messages intact.
    pub fn add_sys_common(&mut self, message: SysCommonMessage, timestamp: u16) -> bool {
        let data = [message.data1, message.data2];
        let data = &data[..usize::from(message.number_of_data_bytes())];
        if !self.has_space_for(self.header_len() + 2 + data.len()) {
            return false;
        }
        self.init_packet(timestamp);
        self.buffer
            .extend_from_slice(&[timestamp_lsb(timestamp), message.header]);
        self.buffer.extend_from_slice(data);
        self.running_timestamp = INVALID_TIMESTAMP;
        self.sysex_open = false;
        true
    }

    /// Add a SysEx message or chunk.
    ///
    /// A leading [`SYSEX_START`] is written with its own timestamp. Then as
    /// many bytes as fit are copied, the remainder is left in `data`. A
    /// trailing [`SYSEX_END`] needs room for its timestamp byte, otherwise
    /// it is left for the next packet. The message has been added
    /// completely once `data` is empty.
    ///
    /// Chunks without a leading [`SYSEX_START`] continue the previous
    /// chunk. They are only accepted if the packet is empty or still ends
    /// with unterminated SysEx data. Once accepted, `true` is returned even
    /// if no byte fits into the packet, check `data` for the remainder.
    ///
    /// Returns `false` without consuming any data if the start of the
    /// message does not fit or if a continuation chunk is not accepted.
    pub fn add_sysex(&mut self, data: &mut &[u8], timestamp: u16) -> bool {
        if data.first() == Some(&SYSEX_START) {
            if !self.has_space_for(self.header_len() + 2) {
                return false;
            }
            self.init_packet(timestamp);
            // SysEx cancels running status
            self.running_header = 0;
            self.buffer
                .extend_from_slice(&[timestamp_lsb(timestamp), SYSEX_START]);
            *data = &data[1..];
        } else if !self.is_empty() && !self.sysex_open {
            log::debug!("SysEx chunk does not continue the current packet");
            return false;
        }
        self.continue_sysex(data, timestamp);
        true
    }

    /// Continue a SysEx message in a new packet.
    ///
    /// Must be called after [`reset()`](Self::reset) with the remaining data
    /// of the previous call to [`add_sysex()`](Self::add_sysex) or
    /// `continue_sysex()`.
    pub fn continue_sysex(&mut self, data: &mut &[u8], timestamp: u16) {
        self.init_packet(timestamp);
        self.sysex_open = true;
        let Some((&last, init)) = data.split_last() else {
            return;
        };
        let copy_len = init.len().min(self.space_left());
        self.buffer.extend_from_slice(&init[..copy_len]);
        if copy_len < init.len() {
            *data = &data[copy_len..];
            return;
        }
        let last_len = if last == SYSEX_END { 2 } else { 1 };
        if !self.has_space_for(last_len) {
            *data = &data[copy_len..];
            return;
        }
        if last == SYSEX_END {
            self.buffer.push(timestamp_lsb(timestamp));
            self.sysex_open = false;
        }
        self.buffer.push(last);
        *data = &[];
    }

    /// Add any non-SysEx message, or a SysEx message that fits completely.
    ///
    /// SysEx messages that need more than the remaining space are not
    /// added. Use [`add_sysex()`](Self::add_sysex) for splitting them.
    pub fn add_message(&mut self, message: &MidiMessage<'_>, timestamp: u16) -> bool {
        match message {
            MidiMessage::Channel(msg) => self.add_channel_message(*msg, timestamp),
            MidiMessage::SysCommon(msg) => self.add_sys_common(*msg, timestamp),
            MidiMessage::RealTime(msg) => self.add_real_time(*msg, timestamp),
            MidiMessage::SysEx(msg) => {
                let mut data = msg.data;
                let mut packet = self.clone();
                if packet.add_sysex(&mut data, timestamp) && data.is_empty() {
                    *self = packet;
                    return true;
                }
                false
            }
        }
    }

    fn add_channel_message_bytes(&mut self, header: u8, data: &[u8], timestamp: u16) -> bool {
        let lsb = timestamp_lsb(timestamp);
        let running_status = header == self.running_header;
        let (write_timestamp, write_header) = if running_status {
            (lsb != self.running_timestamp, false)
        } else {
            (true, true)
        };
        let len = usize::from(write_timestamp) + usize::from(write_header) + data.len();
        if !self.has_space_for(self.header_len() + len) {
            return false;
        }
        self.init_packet(timestamp);
        if write_timestamp {
            self.buffer.push(lsb);
        }
        if write_header {
            self.buffer.push(header);
        }
        self.buffer.extend_from_slice(data);
        self.running_header = header;
        self.running_timestamp = lsb;
        self.sysex_open = false;
        true
    }

    /// Length of the packet header if the packet is still empty.
    fn header_len(&self) -> usize {
        usize::from(self.buffer.is_empty())
    }

    fn space_left(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    fn has_space_for(&self, len: usize) -> bool {
        len <= self.space_left()
    }

    fn init_packet(&mut self, timestamp: u16) {
        if self.buffer.is_empty() {
            self.buffer.push(timestamp_header(timestamp));
        }
    }
}

impl Default for BleMidiPacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}
