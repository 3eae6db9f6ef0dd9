// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use std::time::{Duration, Instant};

use super::{
    BleMidiPacketBuilder, ATT_OVERHEAD, BLE_MIDI_MAX_CAPACITY, BLE_MIDI_MIN_CAPACITY,
};
use crate::message::{MidiMessage, SysExMessage};

/// Transmits finished BLE-MIDI packets, e.g. as GATT notifications.
pub trait BlePacketSink {
    fn send_packet(&mut self, packet: &[u8]);
}

impl<F> BlePacketSink for F
where
    F: FnMut(&[u8]),
{
    fn send_packet(&mut self, packet: &[u8]) {
        self(packet);
    }
}

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(10);

/// ATT MTU that every BLE connection supports.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Collects outgoing messages into BLE-MIDI packets.
///
/// A packet is sent when it is full or when it has been pending for longer
/// than the timeout. The caller drives the timeout by invoking
/// [`poll()`](Self::poll) regularly.
#[derive(Debug)]
pub struct PollingBleMidiSender<S> {
    sink: S,
    builder: BleMidiPacketBuilder,
    timeout: Duration,
    packet_start: Option<Instant>,
    min_mtu: u16,
    forced_min_mtu: Option<u16>,
}

impl<S> PollingBleMidiSender<S>
where
    S: BlePacketSink,
{
    #[must_use]
    pub fn new(sink: S) -> Self {
        let mut sender = Self {
            sink,
            builder: BleMidiPacketBuilder::new(),
            timeout: DEFAULT_SEND_TIMEOUT,
            packet_start: None,
            min_mtu: DEFAULT_ATT_MTU,
            forced_min_mtu: None,
        };
        sender.apply_mtu();
        sender
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set how long messages are buffered before a packet is sent.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Minimum MTU of all connected clients.
    #[must_use]
    pub const fn min_mtu(&self) -> u16 {
        self.min_mtu
    }

    /// Current packet capacity.
    #[must_use]
    pub const fn packet_capacity(&self) -> usize {
        self.builder.capacity()
    }

    /// Update the MTU of the connection.
    pub fn update_mtu(&mut self, mtu: u16) {
        self.min_mtu = mtu;
        self.apply_mtu();
    }

    /// Override the MTU with an artificially small value.
    pub fn force_min_mtu(&mut self, mtu: Option<u16>) {
        self.forced_min_mtu = mtu;
        self.apply_mtu();
    }

    /// Append a message to the current packet.
    ///
    /// Full packets are sent immediately. SysEx messages may span
    /// multiple packets.
    pub fn send_message(&mut self, message: &MidiMessage<'_>, timestamp: u16, now: Instant) {
        if let MidiMessage::SysEx(sysex) = message {
            self.send_sysex(sysex, timestamp, now);
            return;
        }
        if self.builder.add_message(message, timestamp) {
            self.start_packet(now);
            return;
        }
        self.flush();
        if self.builder.add_message(message, timestamp) {
            self.start_packet(now);
        } else {
            log::warn!("Discarding message that does not fit into an empty packet: {message:?}");
        }
    }

    /// Send the pending packet if the timeout has expired.
    pub fn poll(&mut self, now: Instant) {
        let Some(packet_start) = self.packet_start else {
            return;
        };
        if now.saturating_duration_since(packet_start) >= self.timeout {
            self.flush();
        }
    }

    /// Send the pending packet immediately.
    pub fn flush(&mut self) {
        self.packet_start = None;
        if self.builder.is_empty() {
            return;
        }
        log::trace!("Sending BLE-MIDI packet {:02x?}", self.builder.packet());
        self.sink.send_packet(self.builder.packet());
        self.builder.reset();
    }

    fn send_sysex(&mut self, sysex: &SysExMessage<'_>, timestamp: u16, now: Instant) {
        // Subsequent chunks continue where the previous one ended
        if !sysex.is_first_chunk() && !self.builder.is_empty() {
            self.flush();
        }
        let mut data = sysex.data;
        if !self.builder.add_sysex(&mut data, timestamp) {
            self.flush();
            if !self.builder.add_sysex(&mut data, timestamp) {
                log::warn!("Discarding SysEx message that does not fit into an empty packet");
                return;
            }
        }
        self.start_packet(now);
        while !data.is_empty() {
            self.flush();
            self.builder.continue_sysex(&mut data, timestamp);
            self.start_packet(now);
        }
    }

    fn start_packet(&mut self, now: Instant) {
        if self.packet_start.is_none() {
            self.packet_start = Some(now);
        }
    }

    fn apply_mtu(&mut self) {
        let mtu = self
            .forced_min_mtu
            .map_or(self.min_mtu, |forced| forced.min(self.min_mtu));
        let capacity = usize::from(mtu.saturating_sub(ATT_OVERHEAD))
            .clamp(BLE_MIDI_MIN_CAPACITY, BLE_MIDI_MAX_CAPACITY);
        if capacity < self.builder.len() {
            self.flush();
        }
        if let Err(err) = self.builder.set_capacity(capacity) {
            log::warn!("Failed to update BLE-MIDI packet capacity: {err}");
            return;
        }
        log::debug!("BLE-MIDI packet capacity for MTU {mtu}: {capacity}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Cable, ChannelMessage, RealTimeMessage};

    #[derive(Debug, Default)]
    struct RecordingSink(Vec<Vec<u8>>);

    impl BlePacketSink for RecordingSink {
        fn send_packet(&mut self, packet: &[u8]) {
            self.0.push(packet.to_vec());
        }
    }

    fn sender(mtu: u16) -> PollingBleMidiSender<RecordingSink> {
        let mut sender = PollingBleMidiSender::new(RecordingSink::default());
        sender.update_mtu(mtu);
        sender
    }

    fn note_on(note: u8) -> MidiMessage<'static> {
        ChannelMessage::new(0x90, note, 0x7F, Cable::CABLE_1).into()
    }

    #[test]
    fn mtu_to_capacity() {
        let mut sender = PollingBleMidiSender::new(RecordingSink::default());
        assert_eq!(DEFAULT_ATT_MTU, sender.min_mtu());
        assert_eq!(20, sender.packet_capacity());
        sender.update_mtu(10);
        assert_eq!(7, sender.packet_capacity());
        sender.update_mtu(4);
        assert_eq!(BLE_MIDI_MIN_CAPACITY, sender.packet_capacity());
        sender.update_mtu(512);
        assert_eq!(BLE_MIDI_MAX_CAPACITY, sender.packet_capacity());
        sender.force_min_mtu(Some(12));
        assert_eq!(9, sender.packet_capacity());
        sender.force_min_mtu(None);
        assert_eq!(BLE_MIDI_MAX_CAPACITY, sender.packet_capacity());
    }

    #[test]
    fn timeout() {
        let start = Instant::now();
        let mut sender = sender(23);
        sender.send_message(&note_on(0x40), 0x0000, start);
        sender.send_message(&note_on(0x41), 0x0001, start + Duration::from_millis(5));
        sender.poll(start + Duration::from_millis(9));
        assert!(sender.sink().0.is_empty());
        sender.poll(start + DEFAULT_SEND_TIMEOUT);
        assert_eq!(
            &[vec![0x80, 0x80, 0x90, 0x40, 0x7F, 0x81, 0x41, 0x7F]][..],
            sender.sink().0.as_slice()
        );
        // Nothing pending
        sender.poll(start + Duration::from_secs(1));
        assert_eq!(1, sender.sink().0.len());
    }

    #[test]
    fn full_packet_is_sent() {
        let now = Instant::now();
        // Capacity 7
        let mut sender = sender(10);
        sender.send_message(&note_on(0x40), 0x0000, now);
        sender.send_message(&note_on(0x41), 0x0000, now);
        assert!(sender.sink().0.is_empty());
        sender.send_message(&note_on(0x42), 0x0000, now);
        assert_eq!(
            &[vec![0x80, 0x80, 0x90, 0x40, 0x7F, 0x41, 0x7F]][..],
            sender.sink().0.as_slice()
        );
        sender.flush();
        assert_eq!(
            vec![0x80, 0x80, 0x90, 0x42, 0x7F],
            sender.sink().0[1]
        );
    }

    #[test]
    fn real_time_timestamps() {
        let now = Instant::now();
        let mut sender = sender(23);
        sender.send_message(&RealTimeMessage::new(0xF8, Cable::CABLE_1).into(), 0x0102, now);
        sender.send_message(&RealTimeMessage::new(0xF8, Cable::CABLE_1).into(), 0x0102, now);
        sender.flush();
        assert_eq!(
            &[vec![0x82, 0x82, 0xF8, 0x82, 0xF8]][..],
            sender.sink().0.as_slice()
        );
    }

    #[test]
    fn sysex_spans_packets() {
        let now = Instant::now();
        // Capacity 5
        let mut sender = sender(8);
        let data = [0xF0, 0x10, 0x11, 0x12, 0x13, 0x14, 0xF7];
        sender.send_message(&SysExMessage::new(&data, Cable::CABLE_1).into(), 0x0001, now);
        sender.flush();
        assert_eq!(
            &[
                vec![0x80, 0x81, 0xF0, 0x10, 0x11],
                vec![0x80, 0x12, 0x13, 0x14],
                vec![0x80, 0x81, 0xF7],
            ][..],
            sender.sink().0.as_slice()
        );
    }

    #[test]
    fn sysex_after_channel_message() {
        let now = Instant::now();
        let mut sender = sender(23);
        sender.send_message(&note_on(0x40), 0x0000, now);
        let data = [0xF0, 0x10, 0xF7];
        sender.send_message(&SysExMessage::new(&data, Cable::CABLE_1).into(), 0x0000, now);
        sender.flush();
        assert_eq!(
            &[vec![
                0x80, 0x80, 0x90, 0x40, 0x7F, 0x80, 0xF0, 0x10, 0x80, 0xF7
            ]][..],
            sender.sink().0.as_slice()
        );
    }

    #[test]
    fn sysex_chunks_start_new_packets() {
        let now = Instant::now();
        let mut sender = sender(23);
        let first = [0xF0, 0x10, 0x11];
        let last = [0x12, 0xF7];
        sender.send_message(
            &SysExMessage::chunk(&first, Cable::CABLE_1, true, false).into(),
            0x0000,
            now,
        );
        sender.send_message(
            &SysExMessage::chunk(&last, Cable::CABLE_1, false, true).into(),
            0x0000,
            now,
        );
        sender.flush();
        assert_eq!(
            &[
                vec![0x80, 0x80, 0xF0, 0x10, 0x11],
                vec![0x80, 0x12, 0x80, 0xF7],
            ][..],
            sender.sink().0.as_slice()
        );
    }
}
