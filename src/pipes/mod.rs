// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! Routing of MIDI messages between sources and sinks
//!
//! A [`PipeGraph`] owns all sources, sinks and pipes and refers to them
//! by handle. Each source and each sink is attached to at most one pipe
//! directly. Further pipes are chained behind it: pipes fed by the same
//! source form a *through-out* chain, pipes feeding the same sink form a
//! *through-in* chain. A pipe whose through-in predecessor is another
//! pipe delivers into the final sink of that pipe.
//!
//! Sources may lock a cable on all sinks they reach. Channel, system
//! common and SysEx messages of other sources are then dropped for that
//! cable. Real-time messages always pass.

use std::collections::{hash_map::Entry, HashMap};

use thiserror::Error;

use crate::message::{Cable, MidiMessage};

/// Handle of a message source in a [`PipeGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("source #{_0}")]
#[repr(transparent)]
pub struct SourceId(usize);

/// Handle of a message sink in a [`PipeGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("sink #{_0}")]
#[repr(transparent)]
pub struct SinkId(usize);

/// Handle of a pipe in a [`PipeGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("pipe #{_0}")]
#[repr(transparent)]
pub struct PipeId(usize);

/// Two pipes in opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidirectionalPipe {
    /// From the first to the second endpoint.
    pub forward: PipeId,
    /// From the second to the first endpoint.
    pub backward: PipeId,
}

/// Wiring mistakes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("{0} is already connected to a source")]
    PipeHasSource(PipeId),
    #[error("{0} is already connected to a sink")]
    PipeHasSink(PipeId),
    #[error("{0} is already connected")]
    SourceConnected(SourceId),
    #[error("{0} is already connected")]
    SinkConnected(SinkId),
    #[error("unknown {0}")]
    UnknownPipe(PipeId),
    #[error("unknown {0}")]
    UnknownSource(SourceId),
    #[error("unknown {0}")]
    UnknownSink(SinkId),
}

/// Receives the messages that are routed to sinks.
pub trait MidiSinkHandler {
    fn sink_midi(&mut self, sink: SinkId, message: MidiMessage<'_>);
}

impl<F> MidiSinkHandler for F
where
    F: FnMut(SinkId, MidiMessage<'_>),
{
    fn sink_midi(&mut self, sink: SinkId, message: MidiMessage<'_>) {
        self(sink, message);
    }
}

/// Upstream end of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceEnd {
    Source(SourceId),
    /// Through-out predecessor
    Pipe(PipeId),
}

/// Downstream end of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkEnd {
    Sink(SinkId),
    /// Through-in predecessor
    Pipe(PipeId),
}

#[derive(Debug, Default)]
struct Source {
    sink_pipe: Option<PipeId>,
}

#[derive(Debug, Default)]
struct Sink {
    source_pipe: Option<PipeId>,
}

#[derive(Debug, Default)]
struct Pipe {
    source: Option<SourceEnd>,
    sink: Option<SinkEnd>,
    /// Next pipe that feeds the same sink
    through_in: Option<PipeId>,
    /// Next pipe that is fed by the same source
    through_out: Option<PipeId>,
}

type LockKey = (SinkId, Cable);

#[derive(Debug, Default)]
pub struct PipeGraph {
    sources: Vec<Source>,
    sinks: Vec<Sink>,
    pipes: Vec<Pipe>,
    locks: HashMap<LockKey, SourceId>,
    dropped_count: u64,
}

impl PipeGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self) -> SourceId {
        self.sources.push(Source::default());
        SourceId(self.sources.len() - 1)
    }

    pub fn add_sink(&mut self) -> SinkId {
        self.sinks.push(Sink::default());
        SinkId(self.sinks.len() - 1)
    }

    pub fn add_pipe(&mut self) -> PipeId {
        self.pipes.push(Pipe::default());
        PipeId(self.pipes.len() - 1)
    }

    pub fn add_bidirectional_pipe(&mut self) -> BidirectionalPipe {
        BidirectionalPipe {
            forward: self.add_pipe(),
            backward: self.add_pipe(),
        }
    }

    /// Number of non-real-time messages dropped by locks.
    #[must_use]
    pub const fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    fn source_ref(&self, source: SourceId) -> Result<&Source, PipeError> {
        self.sources
            .get(source.0)
            .ok_or(PipeError::UnknownSource(source))
    }

    fn sink_ref(&self, sink: SinkId) -> Result<&Sink, PipeError> {
        self.sinks.get(sink.0).ok_or(PipeError::UnknownSink(sink))
    }

    fn pipe_ref(&self, pipe: PipeId) -> Result<&Pipe, PipeError> {
        self.pipes.get(pipe.0).ok_or(PipeError::UnknownPipe(pipe))
    }

    // Handles of connected entities are always valid, so the plain indexing
    // below cannot fail after the entry points have validated their arguments.

    fn pipe_mut(&mut self, pipe: PipeId) -> &mut Pipe {
        &mut self.pipes[pipe.0]
    }

    fn last_through_out(&self, mut pipe: PipeId) -> PipeId {
        while let Some(next) = self.pipes[pipe.0].through_out {
            pipe = next;
        }
        pipe
    }

    fn last_through_in(&self, mut pipe: PipeId) -> PipeId {
        while let Some(next) = self.pipes[pipe.0].through_in {
            pipe = next;
        }
        pipe
    }

    /// Append `pipe` to the through-out chain of `source`.
    pub fn connect_source(&mut self, source: SourceId, pipe: PipeId) -> Result<(), PipeError> {
        let head = self.source_ref(source)?.sink_pipe;
        if self.pipe_ref(pipe)?.source.is_some() {
            return Err(PipeError::PipeHasSource(pipe));
        }
        let end = if let Some(head) = head {
            let last = self.last_through_out(head);
            self.pipe_mut(last).through_out = Some(pipe);
            SourceEnd::Pipe(last)
        } else {
            self.sources[source.0].sink_pipe = Some(pipe);
            SourceEnd::Source(source)
        };
        self.pipe_mut(pipe).source = Some(end);
        log::debug!("Connected {source} to {pipe}");
        Ok(())
    }

    /// Append `pipe` to the through-in chain of `sink`.
    pub fn connect_sink(&mut self, pipe: PipeId, sink: SinkId) -> Result<(), PipeError> {
        let head = self.sink_ref(sink)?.source_pipe;
        if self.pipe_ref(pipe)?.sink.is_some() {
            return Err(PipeError::PipeHasSink(pipe));
        }
        let end = if let Some(head) = head {
            let last = self.last_through_in(head);
            self.pipe_mut(last).through_in = Some(pipe);
            SinkEnd::Pipe(last)
        } else {
            self.sinks[sink.0].source_pipe = Some(pipe);
            SinkEnd::Sink(sink)
        };
        self.pipe_mut(pipe).sink = Some(end);
        log::debug!("Connected {pipe} to {sink}");
        Ok(())
    }

    /// Route messages from `source` through `pipe` into `sink`.
    ///
    /// Nothing is connected if either end of the pipe is already bound.
    pub fn connect(
        &mut self,
        source: SourceId,
        pipe: PipeId,
        sink: SinkId,
    ) -> Result<(), PipeError> {
        self.source_ref(source)?;
        self.sink_ref(sink)?;
        let p = self.pipe_ref(pipe)?;
        if p.source.is_some() {
            return Err(PipeError::PipeHasSource(pipe));
        }
        if p.sink.is_some() {
            return Err(PipeError::PipeHasSink(pipe));
        }
        self.connect_source(source, pipe)?;
        self.connect_sink(pipe, sink)
    }

    /// Connect two endpoints in both directions.
    ///
    /// Each endpoint consists of a source and a sink, e.g. the input and
    /// output of a MIDI interface.
    pub fn connect_bidirectional(
        &mut self,
        (source_a, sink_a): (SourceId, SinkId),
        pipe: BidirectionalPipe,
        (source_b, sink_b): (SourceId, SinkId),
    ) -> Result<(), PipeError> {
        for id in [pipe.forward, pipe.backward] {
            let p = self.pipe_ref(id)?;
            if p.source.is_some() {
                return Err(PipeError::PipeHasSource(id));
            }
            if p.sink.is_some() {
                return Err(PipeError::PipeHasSink(id));
            }
        }
        self.source_ref(source_b)?;
        self.sink_ref(sink_a)?;
        self.connect(source_a, pipe.forward, sink_b)?;
        self.connect(source_b, pipe.backward, sink_a)
    }

    /// Disconnect both directions.
    pub fn disconnect_bidirectional(&mut self, pipe: BidirectionalPipe) -> bool {
        let forward = self.disconnect(pipe.forward);
        let backward = self.disconnect(pipe.backward);
        forward || backward
    }

    /// Unlink `pipe` from its source and its sink.
    ///
    /// The neighbors in both chains are linked with each other, all
    /// other routes remain intact. Returns `false` if the pipe was not
    /// connected.
    pub fn disconnect(&mut self, pipe: PipeId) -> bool {
        let Some(p) = self.pipes.get_mut(pipe.0) else {
            return false;
        };
        let Pipe {
            source,
            sink,
            through_in,
            through_out,
        } = std::mem::take(p);
        if source.is_none() && sink.is_none() {
            debug_assert!(through_in.is_none() && through_out.is_none());
            return false;
        }
        if let Some(sink_end) = sink {
            match sink_end {
                SinkEnd::Sink(sink) => self.sinks[sink.0].source_pipe = through_in,
                SinkEnd::Pipe(prev) => self.pipe_mut(prev).through_in = through_in,
            }
            if let Some(next) = through_in {
                self.pipe_mut(next).sink = Some(sink_end);
            }
        }
        if let Some(source_end) = source {
            match source_end {
                SourceEnd::Source(source) => self.sources[source.0].sink_pipe = through_out,
                SourceEnd::Pipe(prev) => self.pipe_mut(prev).through_out = through_out,
            }
            if let Some(next) = through_out {
                self.pipe_mut(next).source = Some(source_end);
            }
        }
        log::debug!("Disconnected {pipe}");
        self.release_orphaned_locks();
        true
    }

    /// Disconnect the pipe that routes messages from `source` into `sink`.
    ///
    /// Returns `false` if there is no such pipe.
    pub fn disconnect_route(&mut self, source: SourceId, sink: SinkId) -> bool {
        let found = self
            .source_pipes(source)
            .find(|&pipe| self.final_sink(pipe) == Some(sink));
        found.is_some_and(|pipe| self.disconnect(pipe))
    }

    /// Disconnect the pipe that feeds `sink` with messages from `source`.
    ///
    /// Searches the pipes of the sink instead of the pipes of the source.
    pub fn disconnect_route_from_sink(&mut self, sink: SinkId, source: SourceId) -> bool {
        let found = self
            .sink_pipes(sink)
            .find(|&pipe| self.initial_source(pipe) == Some(source));
        found.is_some_and(|pipe| self.disconnect(pipe))
    }

    /// Disconnect all pipes of `source`.
    pub fn disconnect_source(&mut self, source: SourceId) {
        while let Some(pipe) = self.sources.get(source.0).and_then(|s| s.sink_pipe) {
            self.disconnect(pipe);
        }
    }

    /// Disconnect all pipes of `sink`.
    pub fn disconnect_sink(&mut self, sink: SinkId) {
        while let Some(pipe) = self.sinks.get(sink.0).and_then(|s| s.source_pipe) {
            self.disconnect(pipe);
        }
    }

    /// Transfer all connections and locks of `from` to the unconnected `to`.
    pub fn move_source(&mut self, from: SourceId, to: SourceId) -> Result<(), PipeError> {
        self.source_ref(from)?;
        if self.source_ref(to)?.sink_pipe.is_some() && from != to {
            return Err(PipeError::SourceConnected(to));
        }
        self.swap_sources(from, to)
    }

    /// Exchange all connections and locks of two sources.
    pub fn swap_sources(&mut self, a: SourceId, b: SourceId) -> Result<(), PipeError> {
        let head_a = self.source_ref(a)?.sink_pipe;
        let head_b = self.source_ref(b)?.sink_pipe;
        self.sources[a.0].sink_pipe = head_b;
        self.sources[b.0].sink_pipe = head_a;
        if let Some(head) = head_a {
            self.pipe_mut(head).source = Some(SourceEnd::Source(b));
        }
        if let Some(head) = head_b {
            self.pipe_mut(head).source = Some(SourceEnd::Source(a));
        }
        for owner in self.locks.values_mut() {
            if *owner == a {
                *owner = b;
            } else if *owner == b {
                *owner = a;
            }
        }
        Ok(())
    }

    /// Transfer all connections and locks of `from` to the unconnected `to`.
    pub fn move_sink(&mut self, from: SinkId, to: SinkId) -> Result<(), PipeError> {
        self.sink_ref(from)?;
        if self.sink_ref(to)?.source_pipe.is_some() && from != to {
            return Err(PipeError::SinkConnected(to));
        }
        self.swap_sinks(from, to)
    }

    /// Exchange all connections and locks of two sinks.
    pub fn swap_sinks(&mut self, a: SinkId, b: SinkId) -> Result<(), PipeError> {
        let head_a = self.sink_ref(a)?.source_pipe;
        let head_b = self.sink_ref(b)?.source_pipe;
        self.sinks[a.0].source_pipe = head_b;
        self.sinks[b.0].source_pipe = head_a;
        if let Some(head) = head_a {
            self.pipe_mut(head).sink = Some(SinkEnd::Sink(b));
        }
        if let Some(head) = head_b {
            self.pipe_mut(head).sink = Some(SinkEnd::Sink(a));
        }
        self.locks = self
            .locks
            .drain()
            .map(|((sink, cable), owner)| {
                let sink = if sink == a {
                    b
                } else if sink == b {
                    a
                } else {
                    sink
                };
                ((sink, cable), owner)
            })
            .collect();
        Ok(())
    }

    #[must_use]
    pub fn has_source(&self, pipe: PipeId) -> bool {
        self.pipe_ref(pipe).is_ok_and(|p| p.source.is_some())
    }

    #[must_use]
    pub fn has_sink(&self, pipe: PipeId) -> bool {
        self.pipe_ref(pipe).is_ok_and(|p| p.sink.is_some())
    }

    /// Is another pipe feeding the same sink behind `pipe`?
    #[must_use]
    pub fn has_through_in(&self, pipe: PipeId) -> bool {
        self.pipe_ref(pipe).is_ok_and(|p| p.through_in.is_some())
    }

    /// Is another pipe fed by the same source behind `pipe`?
    #[must_use]
    pub fn has_through_out(&self, pipe: PipeId) -> bool {
        self.pipe_ref(pipe).is_ok_and(|p| p.through_out.is_some())
    }

    #[must_use]
    pub fn through_in(&self, pipe: PipeId) -> Option<PipeId> {
        self.pipe_ref(pipe).ok()?.through_in
    }

    #[must_use]
    pub fn through_out(&self, pipe: PipeId) -> Option<PipeId> {
        self.pipe_ref(pipe).ok()?.through_out
    }

    #[must_use]
    pub fn is_connected_source(&self, source: SourceId) -> bool {
        self.source_ref(source).is_ok_and(|s| s.sink_pipe.is_some())
    }

    #[must_use]
    pub fn is_connected_sink(&self, sink: SinkId) -> bool {
        self.sink_ref(sink).is_ok_and(|s| s.source_pipe.is_some())
    }

    /// The pipe that is directly attached to `source`.
    #[must_use]
    pub fn sink_pipe(&self, source: SourceId) -> Option<PipeId> {
        self.source_ref(source).ok()?.sink_pipe
    }

    /// The pipe that is directly attached to `sink`.
    #[must_use]
    pub fn source_pipe(&self, sink: SinkId) -> Option<PipeId> {
        self.sink_ref(sink).ok()?.source_pipe
    }

    /// The sink that receives the messages of `pipe`.
    #[must_use]
    pub fn final_sink(&self, mut pipe: PipeId) -> Option<SinkId> {
        loop {
            match self.pipe_ref(pipe).ok()?.sink? {
                SinkEnd::Sink(sink) => return Some(sink),
                SinkEnd::Pipe(prev) => pipe = prev,
            }
        }
    }

    /// The source that feeds `pipe`.
    #[must_use]
    pub fn initial_source(&self, mut pipe: PipeId) -> Option<SourceId> {
        loop {
            match self.pipe_ref(pipe).ok()?.source? {
                SourceEnd::Source(source) => return Some(source),
                SourceEnd::Pipe(prev) => pipe = prev,
            }
        }
    }

    /// All pipes fed by `source`, in connection order.
    fn source_pipes(&self, source: SourceId) -> impl Iterator<Item = PipeId> + '_ {
        let head = self.sink_pipe(source);
        std::iter::successors(head, |&pipe| self.pipes[pipe.0].through_out)
    }

    /// All pipes feeding `sink`, in connection order.
    fn sink_pipes(&self, sink: SinkId) -> impl Iterator<Item = PipeId> + '_ {
        let head = self.source_pipe(sink);
        std::iter::successors(head, |&pipe| self.pipes[pipe.0].through_in)
    }

    /// All sinks reachable from `source`.
    #[must_use]
    pub fn sinks_of(&self, source: SourceId) -> Vec<SinkId> {
        self.source_pipes(source)
            .filter_map(|pipe| self.final_sink(pipe))
            .collect()
    }

    /// All sources that reach `sink`.
    #[must_use]
    pub fn sources_of(&self, sink: SinkId) -> Vec<SourceId> {
        self.sink_pipes(sink)
            .filter_map(|pipe| self.initial_source(pipe))
            .collect()
    }

    fn is_locked_by_other(&self, sink: SinkId, cable: Cable, source: Option<SourceId>) -> bool {
        self.locks
            .get(&(sink, cable))
            .is_some_and(|&owner| Some(owner) != source)
    }

    /// Lock `cable` on all sinks that are reachable from `source`.
    ///
    /// Fails without locking anything if any of the sinks is locked by
    /// another source. Locking again is a no-op.
    pub fn try_lock(&mut self, source: SourceId, cable: Cable) -> bool {
        let sinks = self.sinks_of(source);
        if let Some(sink) = sinks
            .iter()
            .find(|&&sink| self.is_locked_by_other(sink, cable, Some(source)))
        {
            log::debug!("{source} failed to lock {cable} of {sink}");
            return false;
        }
        for sink in sinks {
            if let Entry::Vacant(entry) = self.locks.entry((sink, cable)) {
                log::debug!("{source} locked {cable} of {sink}");
                entry.insert(source);
            }
        }
        true
    }

    /// Release all locks of `source` for `cable`.
    pub fn unlock(&mut self, source: SourceId, cable: Cable) {
        self.locks.retain(|&(sink, locked_cable), &mut owner| {
            let release = owner == source && locked_cable == cable;
            if release {
                log::debug!("{source} unlocked {cable} of {sink}");
            }
            !release
        });
    }

    /// Are messages for `cable` through `pipe` blocked by another source?
    #[must_use]
    pub fn is_blocked(&self, pipe: PipeId, cable: Cable) -> bool {
        let Some(sink) = self.final_sink(pipe) else {
            return false;
        };
        self.is_locked_by_other(sink, cable, self.initial_source(pipe))
    }

    /// Can `source` send messages for `cable` to all its sinks?
    #[must_use]
    pub fn can_write(&self, source: SourceId, cable: Cable) -> bool {
        self.sinks_of(source)
            .into_iter()
            .all(|sink| !self.is_locked_by_other(sink, cable, Some(source)))
    }

    fn release_orphaned_locks(&mut self) {
        let orphaned: Vec<LockKey> = self
            .locks
            .iter()
            .filter(|&(&(sink, _), &owner)| !self.sinks_of(owner).contains(&sink))
            .map(|(&key, _)| key)
            .collect();
        for key in orphaned {
            log::debug!("Releasing lock of {cable} on {sink}", cable = key.1, sink = key.0);
            self.locks.remove(&key);
        }
    }

    /// Deliver `message` from `source` to all its sinks.
    ///
    /// Messages that are blocked by a lock of another source are dropped.
    pub fn dispatch(
        &mut self,
        source: SourceId,
        message: MidiMessage<'_>,
        handler: &mut impl MidiSinkHandler,
    ) {
        let pipes: Vec<_> = self.source_pipes(source).collect();
        let cable = message.cable();
        let bypass_locks = matches!(message, MidiMessage::RealTime(_));
        // The most recently connected pipe is served first
        for pipe in pipes.into_iter().rev() {
            let Some(sink) = self.final_sink(pipe) else {
                continue;
            };
            if !bypass_locks && self.is_locked_by_other(sink, cable, Some(source)) {
                self.dropped_count += 1;
                log::warn!("Dropping message from {source} to locked {sink}: {message:?}");
                continue;
            }
            handler.sink_midi(sink, message);
        }
    }
}
