// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::{message::MidiMessage, parser::SYSEX_BUFFER_SIZE};

/// Owned copy of a parsed event for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Parsed {
    Channel(u8, u8, u8),
    SysCommon(u8, u8, u8),
    RealTime(u8),
    SysEx {
        data: Vec<u8>,
        first: bool,
        last: bool,
    },
}

fn collect(parser: &mut SerialMidiParser, mut input: &[u8]) -> Vec<Parsed> {
    let mut parsed = Vec::new();
    loop {
        let event = parser.pull(&mut input);
        let Some(message) = parser.message(event) else {
            break;
        };
        parsed.push(match message {
            MidiMessage::Channel(msg) => Parsed::Channel(msg.header, msg.data1, msg.data2),
            MidiMessage::SysCommon(msg) => Parsed::SysCommon(msg.header, msg.data1, msg.data2),
            MidiMessage::RealTime(msg) => Parsed::RealTime(msg.message),
            MidiMessage::SysEx(msg) => {
                assert_eq!(
                    msg.is_last_chunk(),
                    event == MidiReadEvent::SysExMessage,
                    "{event:?}"
                );
                Parsed::SysEx {
                    data: msg.data.to_vec(),
                    first: msg.is_first_chunk(),
                    last: msg.is_last_chunk(),
                }
            }
        });
    }
    assert!(input.is_empty());
    parsed
}

fn parse(input: &[u8]) -> Vec<Parsed> {
    pretty_env_logger::try_init().ok();
    collect(&mut SerialMidiParser::new(false), input)
}

fn sysex(data: &[u8], first: bool, last: bool) -> Parsed {
    Parsed::SysEx {
        data: data.to_vec(),
        first,
        last,
    }
}

#[test]
fn note_off() {
    assert_eq!(vec![Parsed::Channel(0x82, 0x20, 0x7F)], parse(&[0x82, 0x20, 0x7F]));
}

#[test]
fn incomplete_message() {
    let mut parser = SerialMidiParser::new(false);
    let mut input: &[u8] = &[0x92, 0x3C];
    assert_eq!(MidiReadEvent::NoMessage, parser.pull(&mut input));
    let mut input: &[u8] = &[0x40];
    assert_eq!(MidiReadEvent::ChannelMessage, parser.pull(&mut input));
    assert_eq!(
        ChannelMessage::new(0x92, 0x3C, 0x40, Cable::CABLE_1),
        parser.channel_message()
    );
}

#[test]
fn running_status() {
    assert_eq!(
        vec![
            Parsed::Channel(0x93, 0x10, 0x7F),
            Parsed::Channel(0x93, 0x11, 0x7E),
            Parsed::Channel(0x93, 0x12, 0x7D),
        ],
        parse(&[0x93, 0x10, 0x7F, 0x11, 0x7E, 0x12, 0x7D])
    );
}

#[test]
fn running_status_program_change() {
    assert_eq!(
        vec![
            Parsed::Channel(0xC5, 0x10, 0x00),
            Parsed::Channel(0xC5, 0x11, 0x00),
            Parsed::Channel(0xC5, 0x12, 0x00),
        ],
        parse(&[0xC5, 0x10, 0x11, 0x12])
    );
}

#[test]
fn data_without_status_is_ignored() {
    assert_eq!(
        vec![Parsed::Channel(0x90, 0x01, 0x02)],
        parse(&[0x01, 0x02, 0x90, 0x01, 0x02])
    );
}

#[test]
fn real_time_interrupts_channel_message() {
    assert_eq!(
        vec![Parsed::RealTime(0xF8), Parsed::Channel(0x94, 0x10, 0x7F)],
        parse(&[0x94, 0x10, 0xF8, 0x7F])
    );
}

#[test]
fn complete_sysex() {
    assert_eq!(
        vec![sysex(&[0xF0, 0x01, 0x02, 0xF7], true, true)],
        parse(&[0xF0, 0x01, 0x02, 0xF7])
    );
}

#[test]
fn empty_sysex_messages() {
    assert_eq!(
        vec![
            sysex(&[0xF0, 0xF7], true, true),
            sysex(&[0xF0, 0x12, 0xF7], true, true),
        ],
        parse(&[0xF0, 0xF7, 0xF0, 0x12, 0xF7])
    );
}

#[test]
fn sysex_interrupted_by_real_time() {
    assert_eq!(
        vec![
            Parsed::RealTime(0xF8),
            sysex(&[0xF0, 0x01, 0x02, 0x03, 0xF7], true, true),
        ],
        parse(&[0xF0, 0x01, 0x02, 0xF8, 0x03, 0xF7])
    );
}

#[test]
fn sysex_terminated_by_channel_status() {
    assert_eq!(
        vec![
            sysex(&[0xF0, 0x01, 0x02, 0x03], true, true),
            Parsed::Channel(0x8F, 0x10, 0x12),
        ],
        parse(&[0xF0, 0x01, 0x02, 0x03, 0x8F, 0x10, 0x12])
    );
}

#[test]
fn sysex_terminated_by_sysex_start() {
    assert_eq!(
        vec![
            sysex(&[0xF0, 0x01], true, true),
            sysex(&[0xF0, 0x02, 0xF7], true, true),
        ],
        parse(&[0xF0, 0x01, 0xF0, 0x02, 0xF7])
    );
}

#[test]
fn data_after_sysex_end_is_ignored() {
    assert_eq!(
        vec![
            sysex(&[0xF0, 0x01, 0xF7], true, true),
            Parsed::Channel(0x90, 0x05, 0x06),
        ],
        parse(&[0xF0, 0x01, 0xF7, 0x02, 0x03, 0x90, 0x05, 0x06])
    );
}

#[test]
fn stray_sysex_end_is_ignored() {
    assert_eq!(
        vec![
            Parsed::Channel(0x90, 0x01, 0x02),
            Parsed::Channel(0x90, 0x03, 0x04),
        ],
        parse(&[0x90, 0x01, 0x02, 0xF7, 0x03, 0x04])
    );
}

#[test]
fn sysex_cancels_running_status() {
    assert_eq!(
        vec![
            Parsed::Channel(0x90, 0x01, 0x02),
            sysex(&[0xF0, 0xF7], true, true),
        ],
        parse(&[0x90, 0x01, 0x02, 0xF0, 0xF7, 0x03, 0x04])
    );
}

#[test]
fn sysex_multiple_chunks() {
    // F0 + 2 full buffers of data + F7
    let mut input = vec![0xF0];
    input.extend((0..2 * SYSEX_BUFFER_SIZE - 1).map(|i| (i % 0x80) as u8));
    input.push(0xF7);
    let parsed = parse(&input);
    assert_eq!(
        vec![
            sysex(&input[..SYSEX_BUFFER_SIZE], true, false),
            sysex(&input[SYSEX_BUFFER_SIZE..2 * SYSEX_BUFFER_SIZE], false, false),
            sysex(&[0xF7], false, true),
        ],
        parsed
    );
}

#[test]
fn sysex_chunk_then_implicit_end() {
    let mut input = vec![0xF0];
    input.extend(std::iter::repeat(0x11).take(SYSEX_BUFFER_SIZE));
    input.extend([0x90, 0x01, 0x02]);
    let parsed = parse(&input);
    assert_eq!(
        vec![
            sysex(&input[..SYSEX_BUFFER_SIZE], true, false),
            sysex(&[0x11], false, true),
            Parsed::Channel(0x90, 0x01, 0x02),
        ],
        parsed
    );
}

#[test]
fn sys_common_messages() {
    assert_eq!(
        vec![
            Parsed::SysCommon(0xF1, 0x12, 0x00),
            Parsed::SysCommon(0xF2, 0x12, 0x34),
            Parsed::SysCommon(0xF3, 0x56, 0x00),
            Parsed::SysCommon(0xF6, 0x00, 0x00),
        ],
        parse(&[0xF1, 0x12, 0xF2, 0x12, 0x34, 0xF3, 0x56, 0xF6])
    );
}

#[test]
fn sys_common_cancels_running_status() {
    assert_eq!(
        vec![
            Parsed::Channel(0x90, 0x01, 0x02),
            Parsed::SysCommon(0xF6, 0x00, 0x00),
        ],
        parse(&[0x90, 0x01, 0x02, 0xF6, 0x03, 0x04])
    );
}

#[test]
fn ble_mode_sys_common_keeps_running_status() {
    let mut parser = SerialMidiParser::new(true);
    assert_eq!(
        vec![
            Parsed::Channel(0x90, 0x01, 0x02),
            Parsed::SysCommon(0xF3, 0x05, 0x00),
            Parsed::Channel(0x90, 0x03, 0x04),
        ],
        collect(&mut parser, &[0x90, 0x01, 0x02, 0xF3, 0x05, 0x03, 0x04])
    );
    assert_eq!(Some(0x90), parser.running_status());
}

#[test]
fn real_time_keeps_running_status() {
    assert_eq!(
        vec![
            Parsed::Channel(0x90, 0x01, 0x02),
            Parsed::RealTime(0xFA),
            Parsed::Channel(0x90, 0x03, 0x04),
        ],
        parse(&[0x90, 0x01, 0x02, 0xFA, 0x03, 0x04])
    );
}

#[test]
fn split_input_yields_same_events() {
    let input = [
        0x90, 0x01, 0x02, 0x03, 0x04, 0xF0, 0x10, 0xF8, 0x11, 0xF7, 0xB1, 0x07, 0x7F, 0xF2,
        0x01, 0x02, 0xF0, 0x20, 0x21, 0x80, 0x40, 0x00, 0xF7, 0xC0, 0x05,
    ];
    let whole = parse(&input);
    for split in 0..=input.len() {
        let mut parser = SerialMidiParser::new(false);
        let (head, tail) = input.split_at(split);
        let mut parsed = collect(&mut parser, head);
        parsed.extend(collect(&mut parser, tail));
        assert_eq!(whole, parsed, "split at {split}");
    }
    for chunk_len in 1..4 {
        let mut parser = SerialMidiParser::new(false);
        let parsed = input
            .chunks(chunk_len)
            .flat_map(|chunk| collect(&mut parser, chunk))
            .collect::<Vec<_>>();
        assert_eq!(whole, parsed, "chunks of {chunk_len}");
    }
}
