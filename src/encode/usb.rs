// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use crate::{
    message::{Cable, MidiMessage, SysCommonMessage, SysExMessage},
    parser::{CodeIndexNumber, UsbMidiPacket, USB_MIDI_NUMBER_OF_CABLES},
};

/// Up to 3 SysEx bytes that are waiting for the next chunk.
#[derive(Debug, Clone, Copy, Default)]
struct PendingSysEx {
    bytes: [u8; 3],
    len: usize,
}

/// Encodes messages into USB-MIDI event packets.
///
/// SysEx chunks may have arbitrary lengths. Bytes that do not fill a
/// complete packet are held back per cable until the next chunk arrives.
#[derive(Debug, Clone, Default)]
pub struct UsbMidiEncoder {
    pending: [PendingSysEx; USB_MIDI_NUMBER_OF_CABLES],
}

const fn packet_header(cable: Cable, cin: CodeIndexNumber) -> u8 {
    (cable.index() << 4) | cin as u8
}

impl UsbMidiEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the encoded packets to `output`.
    pub fn encode(&mut self, message: &MidiMessage<'_>, output: &mut Vec<UsbMidiPacket>) {
        match message {
            MidiMessage::Channel(msg) => {
                let Some(cin) = CodeIndexNumber::from_channel_status(msg.header) else {
                    log::warn!("Invalid channel message status {:02x}", msg.header);
                    return;
                };
                let data2 = if msg.has_two_data_bytes() { msg.data2 } else { 0 };
                output.push([packet_header(msg.cable, cin), msg.header, msg.data1, data2]);
            }
            MidiMessage::SysCommon(msg) => output.push(sys_common_packet(msg)),
            MidiMessage::RealTime(msg) => {
                let header = packet_header(msg.cable, CodeIndexNumber::SingleByte);
                output.push([header, msg.message, 0, 0]);
            }
            MidiMessage::SysEx(msg) => self.encode_sysex(msg, output),
        }
    }

    fn encode_sysex(&mut self, message: &SysExMessage<'_>, output: &mut Vec<UsbMidiPacket>) {
        let cable = message.cable;
        let pending = &mut self.pending[usize::from(cable.index())];
        if message.is_first_chunk() && pending.len > 0 {
            log::debug!("Discarding unfinished SysEx on {cable}");
            *pending = PendingSysEx::default();
        }
        let last_index = message.data.len().checked_sub(1);
        for (index, &byte) in message.data.iter().enumerate() {
            pending.bytes[pending.len] = byte;
            pending.len += 1;
            let is_final_byte = message.is_last_chunk() && Some(index) == last_index;
            if pending.len == 3 && !is_final_byte {
                let [b1, b2, b3] = pending.bytes;
                output.push([
                    packet_header(cable, CodeIndexNumber::SysExStartCont),
                    b1,
                    b2,
                    b3,
                ]);
                *pending = PendingSysEx::default();
            }
        }
        if !message.is_last_chunk() || pending.len == 0 {
            return;
        }
        let cin = match pending.len {
            1 => CodeIndexNumber::SysExEnd1B,
            2 => CodeIndexNumber::SysExEnd2B,
            _ => CodeIndexNumber::SysExEnd3B,
        };
        let [b1, b2, b3] = pending.bytes;
        let mut packet = [packet_header(cable, cin), b1, b2, b3];
        packet[1 + pending.len..].fill(0);
        output.push(packet);
        *pending = PendingSysEx::default();
    }
}

fn sys_common_packet(message: &SysCommonMessage) -> UsbMidiPacket {
    let cin = match message.number_of_data_bytes() {
        0 => CodeIndexNumber::SysExEnd1B,
        1 => CodeIndexNumber::SystemCommon2B,
        _ => CodeIndexNumber::SystemCommon3B,
    };
    let mut packet = [
        packet_header(message.cable, cin),
        message.header,
        message.data1,
        message.data2,
    ];
    packet[2 + usize::from(message.number_of_data_bytes())..].fill(0);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{ChannelMessage, RealTimeMessage},
        parser::{MidiParser, UsbMidiParser},
        queue::QueuedMessage,
    };

    fn encode(encoder: &mut UsbMidiEncoder, message: MidiMessage<'_>) -> Vec<UsbMidiPacket> {
        let mut output = Vec::new();
        encoder.encode(&message, &mut output);
        output
    }

    #[test]
    fn channel_messages() {
        let mut encoder = UsbMidiEncoder::new();
        let cable = Cable::new(2).unwrap();
        assert_eq!(
            vec![[0x29, 0x93, 0x40, 0x7F]],
            encode(
                &mut encoder,
                ChannelMessage::new(0x93, 0x40, 0x7F, cable).into()
            )
        );
        // Unused data bytes are cleared
        assert_eq!(
            vec![[0x0C, 0xC0, 0x05, 0x00]],
            encode(
                &mut encoder,
                ChannelMessage::new(0xC0, 0x05, 0x55, Cable::CABLE_1).into()
            )
        );
    }

    #[test]
    fn system_messages() {
        let mut encoder = UsbMidiEncoder::new();
        assert_eq!(
            vec![[0x0F, 0xF8, 0x00, 0x00]],
            encode(&mut encoder, RealTimeMessage::new(0xF8, Cable::CABLE_1).into())
        );
        assert_eq!(
            vec![[0x03, 0xF2, 0x10, 0x20]],
            encode(
                &mut encoder,
                SysCommonMessage::new(0xF2, 0x10, 0x20, Cable::CABLE_1).into()
            )
        );
        assert_eq!(
            vec![[0x02, 0xF3, 0x05, 0x00]],
            encode(
                &mut encoder,
                SysCommonMessage::new(0xF3, 0x05, 0x7F, Cable::CABLE_1).into()
            )
        );
        assert_eq!(
            vec![[0x05, 0xF6, 0x00, 0x00]],
            encode(
                &mut encoder,
                SysCommonMessage::new(0xF6, 0x00, 0x00, Cable::CABLE_1).into()
            )
        );
    }

    #[test]
    fn sysex_end_lengths() {
        let mut encoder = UsbMidiEncoder::new();
        assert_eq!(
            vec![[0x06, 0xF0, 0xF7, 0x00]],
            encode(
                &mut encoder,
                SysExMessage::new(&[0xF0, 0xF7], Cable::CABLE_1).into()
            )
        );
        assert_eq!(
            vec![[0x07, 0xF0, 0x01, 0xF7]],
            encode(
                &mut encoder,
                SysExMessage::new(&[0xF0, 0x01, 0xF7], Cable::CABLE_1).into()
            )
        );
        assert_eq!(
            vec![[0x04, 0xF0, 0x01, 0x02], [0x05, 0xF7, 0x00, 0x00]],
            encode(
                &mut encoder,
                SysExMessage::new(&[0xF0, 0x01, 0x02, 0xF7], Cable::CABLE_1).into()
            )
        );
        assert_eq!(
            vec![[0x04, 0xF0, 0x01, 0x02], [0x06, 0x03, 0xF7, 0x00]],
            encode(
                &mut encoder,
                SysExMessage::new(&[0xF0, 0x01, 0x02, 0x03, 0xF7], Cable::CABLE_1).into()
            )
        );
    }

    #[test]
    fn sysex_chunks_are_regrouped() {
        let mut encoder = UsbMidiEncoder::new();
        let cable = Cable::new(1).unwrap();
        assert_eq!(
            vec![[0x14, 0xF0, 0x01, 0x02]],
            encode(
                &mut encoder,
                SysExMessage::chunk(&[0xF0, 0x01, 0x02, 0x03], cable, true, false).into()
            )
        );
        assert!(encode(
            &mut encoder,
            SysExMessage::chunk(&[0x04], cable, false, false).into()
        )
        .is_empty());
        assert_eq!(
            vec![[0x14, 0x03, 0x04, 0x05], [0x17, 0x06, 0x07, 0xF7]],
            encode(
                &mut encoder,
                SysExMessage::chunk(&[0x05, 0x06, 0x07, 0xF7], cable, false, true).into()
            )
        );
    }

    #[test]
    fn parse_encoded() {
        let sysex: Vec<u8> = std::iter::once(0xF0)
            .chain(0..200)
            .chain(std::iter::once(0xF7))
            .collect();
        let cable = Cable::new(5).unwrap();
        let mut encoder = UsbMidiEncoder::new();
        let mut packets = Vec::new();
        encoder.encode(
            &ChannelMessage::new(0xB2, 0x07, 0x64, cable).into(),
            &mut packets,
        );
        encoder.encode(&SysExMessage::new(&sysex, cable).into(), &mut packets);
        encoder.encode(&RealTimeMessage::new(0xFC, cable).into(), &mut packets);

        let mut parser = UsbMidiParser::new();
        let mut input = packets.as_slice();
        let mut parsed = Vec::new();
        loop {
            let event = parser.pull(&mut input);
            let Some(message) = parser.message(event) else {
                break;
            };
            parsed.push(QueuedMessage::from(message));
        }
        assert_eq!(4, parsed.len());
        assert_eq!(
            QueuedMessage::Channel(ChannelMessage::new(0xB2, 0x07, 0x64, cable)),
            parsed[0]
        );
        let first = parsed[1].as_sys_ex().unwrap();
        assert!(first.is_first_chunk());
        assert!(!first.is_last_chunk());
        let last = parsed[2].as_sys_ex().unwrap();
        assert!(last.is_last_chunk());
        assert_eq!(cable, last.cable);
        let reassembled: Vec<u8> = first.data.iter().chain(last.data.iter()).copied().collect();
        assert_eq!(sysex, reassembled);
        assert_eq!(
            QueuedMessage::RealTime(RealTimeMessage::new(0xFC, cable)),
            parsed[3]
        );
    }
}
