// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! Bounded queue of parsed messages
//!
//! Hands messages from the parsing context over to the application.
//! SysEx payloads are copied into the queue, because the parser reuses
//! its buffer for the next chunk.

use std::collections::VecDeque;

use enum_as_inner::EnumAsInner;

use crate::message::{
    Cable, ChannelMessage, MidiMessage, RealTimeMessage, SysCommonMessage, SysExMessage,
};

/// A SysEx message or chunk that owns its payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnedSysExMessage {
    pub data: Box<[u8]>,
    pub cable: Cable,
    first_chunk: bool,
    last_chunk: bool,
}

impl OwnedSysExMessage {
    #[must_use]
    pub fn as_message(&self) -> SysExMessage<'_> {
        SysExMessage::chunk(&self.data, self.cable, self.first_chunk, self.last_chunk)
    }

    #[must_use]
    pub const fn is_first_chunk(&self) -> bool {
        self.first_chunk
    }

    #[must_use]
    pub const fn is_last_chunk(&self) -> bool {
        self.last_chunk
    }
}

impl From<SysExMessage<'_>> for OwnedSysExMessage {
    fn from(from: SysExMessage<'_>) -> Self {
        Self {
            data: from.data.into(),
            cable: from.cable,
            first_chunk: from.is_first_chunk(),
            last_chunk: from.is_last_chunk(),
        }
    }
}

/// Owned counterpart of [`MidiMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumAsInner)]
pub enum QueuedMessage {
    Channel(ChannelMessage),
    SysCommon(SysCommonMessage),
    RealTime(RealTimeMessage),
    SysEx(OwnedSysExMessage),
}

impl QueuedMessage {
    /// Borrow as a [`MidiMessage`], e.g. for dispatching.
    #[must_use]
    pub fn as_message(&self) -> MidiMessage<'_> {
        match self {
            Self::Channel(msg) => (*msg).into(),
            Self::SysCommon(msg) => (*msg).into(),
            Self::RealTime(msg) => (*msg).into(),
            Self::SysEx(msg) => msg.as_message().into(),
        }
    }

    #[must_use]
    pub const fn cable(&self) -> Cable {
        match self {
            Self::Channel(msg) => msg.cable,
            Self::SysCommon(msg) => msg.cable,
            Self::RealTime(msg) => msg.cable,
            Self::SysEx(msg) => msg.cable,
        }
    }
}

impl From<MidiMessage<'_>> for QueuedMessage {
    fn from(from: MidiMessage<'_>) -> Self {
        match from {
            MidiMessage::Channel(msg) => Self::Channel(msg),
            MidiMessage::SysCommon(msg) => Self::SysCommon(msg),
            MidiMessage::RealTime(msg) => Self::RealTime(msg),
            MidiMessage::SysEx(msg) => Self::SysEx(msg.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub message: QueuedMessage,
    /// 13-bit BLE-MIDI timestamp, 0 for other transports.
    pub timestamp: u16,
}

/// First-in first-out queue with a fixed capacity.
///
/// Never blocks and never overwrites. Messages that arrive while the
/// queue is full are dropped and counted.
#[derive(Debug)]
pub struct MessageQueue {
    entries: VecDeque<QueueEntry>,
    capacity: usize,
    dropped_count: u64,
}

impl MessageQueue {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped_count: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Number of messages that have been dropped because the queue was full.
    #[must_use]
    pub const fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Append a copy of `message`.
    ///
    /// Returns `false` if the message has been dropped.
    pub fn push(&mut self, message: MidiMessage<'_>, timestamp: u16) -> bool {
        if self.is_full() {
            self.dropped_count += 1;
            log::warn!(
                "Message queue full, dropping {message:?} ({dropped_count} dropped)",
                dropped_count = self.dropped_count
            );
            return false;
        }
        self.entries.push_back(QueueEntry {
            message: message.into(),
            timestamp,
        });
        true
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Discard all pending messages.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
