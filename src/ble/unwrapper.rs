// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::TIMESTAMP_MASK;
use crate::{message::is_data_byte, parser::BytePuller};

/// Extracts the MIDI byte stream from BLE-MIDI packets.
///
/// Removes the packet header and the timestamp bytes and keeps track of
/// the 13-bit timestamp of the message that is currently being read.
/// The packet data itself is passed in on every pull, the unwrapper only
/// stores the read position.
#[derive(Debug, Clone, Default)]
pub struct BleMidiUnwrapper {
    timestamp: u16,
    prev_was_timestamp: bool,
    offset: usize,
    /// The current packet is malformed, including its continuations.
    discarding: bool,
}

impl BleMidiUnwrapper {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timestamp: 0,
            prev_was_timestamp: false,
            offset: 0,
            discarding: false,
        }
    }

    /// Start reading a new packet.
    ///
    /// Returns `false` and skips the packet if it is malformed. Subsequent
    /// continuations of a malformed packet are skipped as well.
    pub fn begin_packet(&mut self, packet: &[u8]) -> bool {
        let [header, second, ..] = *packet else {
            log::warn!("Discarding short BLE-MIDI packet {packet:02x?}");
            self.discarding = true;
            return false;
        };
        if is_data_byte(header) {
            log::warn!("Discarding BLE-MIDI packet without header {packet:02x?}");
            self.discarding = true;
            return false;
        }
        self.discarding = false;
        let high = (u16::from(header) & 0x3F) << 7;
        if is_data_byte(second) {
            // SysEx continuation: data follows the header directly
            self.timestamp = high;
            self.prev_was_timestamp = false;
            self.offset = 1;
        } else {
            self.timestamp = high | (u16::from(second) & 0x7F);
            self.prev_was_timestamp = true;
            self.offset = 2;
        }
        true
    }

    /// Continue reading the same packet from a subsequent chunk.
    pub fn begin_continuation(&mut self) {
        if self.discarding {
            log::debug!("Discarding continuation of malformed BLE-MIDI packet");
        }
        self.offset = 0;
    }

    /// Timestamp of the last byte that has been pulled.
    #[must_use]
    pub const fn timestamp(&self) -> u16 {
        self.timestamp
    }

    /// Pull the next MIDI byte from `data`, skipping timestamps.
    pub fn pull(&mut self, data: &[u8]) -> Option<u8> {
        if self.discarding {
            return None;
        }
        while let Some(&byte) = data.get(self.offset) {
            self.offset += 1;
            if is_data_byte(byte) {
                self.prev_was_timestamp = false;
                return Some(byte);
            }
            if self.prev_was_timestamp {
                // Status byte following its timestamp
                self.prev_was_timestamp = false;
                return Some(byte);
            }
            self.update_timestamp(byte);
            self.prev_was_timestamp = true;
        }
        None
    }

    /// Bind the unwrapper to a chunk of data for pulling.
    pub fn puller<'a>(&'a mut self, data: &'a [u8]) -> UnwrapPuller<'a> {
        UnwrapPuller {
            unwrapper: self,
            data,
        }
    }

    fn update_timestamp(&mut self, lsb_byte: u8) {
        let lsb = u16::from(lsb_byte) & 0x7F;
        let mut timestamp = self.timestamp;
        if lsb < (timestamp & 0x7F) {
            // Overflow of the lower 7 bits
            timestamp += 0x80;
        }
        self.timestamp = ((timestamp & !0x7F) | lsb) & TIMESTAMP_MASK;
    }
}

/// [`BytePuller`] over a chunk of BLE-MIDI packet data.
#[derive(Debug)]
pub struct UnwrapPuller<'a> {
    unwrapper: &'a mut BleMidiUnwrapper,
    data: &'a [u8],
}

impl BytePuller for UnwrapPuller<'_> {
    fn pull_byte(&mut self) -> Option<u8> {
        self.unwrapper.pull(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwrap_all(unwrapper: &mut BleMidiUnwrapper, data: &[u8]) -> Vec<(u8, u16)> {
        std::iter::from_fn(|| {
            let byte = unwrapper.pull(data)?;
            Some((byte, unwrapper.timestamp()))
        })
        .collect()
    }

    #[test]
    fn single_message() {
        let packet = [0x81, 0x82, 0x92, 0x12, 0x34];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(
            vec![(0x92, 0x82), (0x12, 0x82), (0x34, 0x82)],
            unwrap_all(&mut unwrapper, &packet)
        );
    }

    #[test]
    fn timestamps_per_message() {
        let packet = [0x81, 0x82, 0x92, 0x12, 0x34, 0x85, 0x56, 0x78, 0x86, 0xF8];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(
            vec![
                (0x92, 0x82),
                (0x12, 0x82),
                (0x34, 0x82),
                (0x56, 0x85),
                (0x78, 0x85),
                (0xF8, 0x86),
            ],
            unwrap_all(&mut unwrapper, &packet)
        );
    }

    #[test]
    fn timestamp_lsb_overflow() {
        let packet = [0x81, 0xFE, 0xF8, 0x81, 0xFA];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(
            vec![(0xF8, 0x00FE), (0xFA, 0x0101)],
            unwrap_all(&mut unwrapper, &packet)
        );
    }

    #[test]
    fn timestamp_wraps_around() {
        let packet = [0xBF, 0xFF, 0xF8, 0x80, 0xFA];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(
            vec![(0xF8, 0x1FFF), (0xFA, 0x0000)],
            unwrap_all(&mut unwrapper, &packet)
        );
    }

    #[test]
    fn sysex_continuation_packet() {
        let packet = [0x81, 0x13, 0x14, 0x82, 0xF7];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(
            vec![(0x13, 0x80), (0x14, 0x80), (0xF7, 0x82)],
            unwrap_all(&mut unwrapper, &packet)
        );
    }

    #[test]
    fn continuation_chunk() {
        let first = [0x81, 0x82, 0x92, 0x12];
        let second = [0x34, 0x83, 0xF8];
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(unwrapper.begin_packet(&first));
        let mut bytes = unwrap_all(&mut unwrapper, &first);
        unwrapper.begin_continuation();
        bytes.extend(unwrap_all(&mut unwrapper, &second));
        assert_eq!(
            vec![(0x92, 0x82), (0x12, 0x82), (0x34, 0x82), (0xF8, 0x83)],
            bytes
        );
    }

    #[test]
    fn invalid_packets() {
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(!unwrapper.begin_packet(&[]));
        assert!(!unwrapper.begin_packet(&[0x80]));
        let packet = [0x01, 0x82, 0x92];
        assert!(!unwrapper.begin_packet(&packet));
        assert_eq!(None, unwrapper.pull(&packet));
    }

    #[test]
    fn continuation_of_invalid_packet() {
        let mut unwrapper = BleMidiUnwrapper::new();
        assert!(!unwrapper.begin_packet(&[0x01, 0x82]));
        unwrapper.begin_continuation();
        assert_eq!(None, unwrapper.pull(&[0x90, 0x40, 0x7F]));

        // The next valid packet is read again
        let packet = [0x81, 0x82, 0xF8];
        assert!(unwrapper.begin_packet(&packet));
        assert_eq!(vec![(0xF8, 0x82)], unwrap_all(&mut unwrapper, &packet));
    }
}
