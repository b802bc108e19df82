//! Pairing segment production with steady delivery to the sink.
//!
//! Two flows meet at the [`PlaybackBuffer`]. Inbound, the player asks the mix
//! for one segment at a time, but only when the segment fits into the free
//! space. Outbound, it hands the sink one chunk and waits until the sink asks
//! for more. Every seek bumps a generation number; a reply from an older
//! generation is received and thrown away.

use std::sync::Arc;

use beatmix_transport::{BitDepth, PcmBuffer};
use parking_lot::Mutex;

use crate::buffer::{BufferStats, PlaybackBuffer};
use crate::config::{JumpTo, Settings};
use crate::mix::TimelineSnapshot;

/// State of one direction of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Idle.
    Blocking,
    /// Outbound only: play is wanted but the buffer is short.
    Scheduled,
    /// Inbound only: the reply in flight is stale.
    Ignoring,
    /// A request or chunk is in flight.
    Awaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRequest {
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReply {
    pub index: usize,
    pub generation: u64,
    pub pcm: PcmBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback position in frames.
    Position(usize),
    State { playing: bool },
}

/// Where the player's requests, chunks and events go.
///
/// Implementations must not call back into the player synchronously.
pub trait PlaybackLink: Send + Sync {
    fn request_segment(&self, request: SegmentRequest);
    fn deliver(&self, chunk: PcmBuffer);
    fn notify(&self, event: PlayerEvent);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
    /// Samples per chunk sent to the sink.
    pub chunk_samples: usize,
    /// Buffer capacity in samples.
    pub capacity: usize,
    pub jump_to: JumpTo,
    pub warnings: bool,
}

impl PlayerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mix = &settings.mix;
        let playback = &settings.playback;
        Self {
            sample_rate: mix.sample_rate,
            channels: mix.channels,
            bit_depth: mix.bit_depth,
            chunk_samples: playback.chunk_samples(mix.sample_rate, mix.channels),
            capacity: playback.buffer_samples(mix.bit_depth),
            jump_to: playback.jump_to,
            warnings: playback.warnings,
        }
    }
}

struct PlayerState {
    timeline: Arc<TimelineSnapshot>,
    /// Next segment to request.
    index: usize,
    /// Frames handed to the sink since the segment the player was reset to.
    position: usize,
    buffer: PlaybackBuffer,
    inbound: Flow,
    outbound: Flow,
    generation: u64,
}

impl PlayerState {
    fn exhausted(&self) -> bool {
        self.inbound == Flow::Blocking && self.index >= self.timeline.num_segments
    }

    fn current_segment(&self) -> usize {
        self.timeline.grid.search_right(self.position).saturating_sub(1)
    }
}

pub struct Player {
    config: PlayerConfig,
    link: Arc<dyn PlaybackLink>,
    state: Mutex<PlayerState>,
}

impl Player {
    pub fn new(config: PlayerConfig, link: Arc<dyn PlaybackLink>) -> Self {
        let state = PlayerState {
            timeline: Arc::new(TimelineSnapshot::empty(config.sample_rate, config.channels)),
            index: 0,
            position: 0,
            buffer: PlaybackBuffer::new(config.capacity, config.warnings),
            inbound: Flow::Blocking,
            outbound: Flow::Blocking,
            generation: 0,
        };
        Self {
            config,
            link,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    pub fn playing(&self) -> bool {
        matches!(self.state.lock().outbound, Flow::Awaiting | Flow::Scheduled)
    }

    pub fn inbound(&self) -> Flow {
        self.state.lock().inbound
    }

    pub fn outbound(&self) -> Flow {
        self.state.lock().outbound
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Samples waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.filled()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.state.lock().buffer.stats()
    }

    /// A new mix was loaded: stop and start over from the first segment.
    pub fn loaded(&self, timeline: Arc<TimelineSnapshot>) {
        let mut st = self.state.lock();
        st.timeline = timeline;
        st.outbound = Flow::Blocking;
        self.reset(&mut st, 0);
    }

    /// The grid grew or changed; more segments may be requestable.
    pub fn timeline_updated(&self, timeline: Arc<TimelineSnapshot>) {
        let mut st = self.state.lock();
        st.timeline = timeline;
        self.request(&mut st);
    }

    pub fn toggle_play(&self) {
        let mut st = self.state.lock();
        if st.outbound == Flow::Blocking {
            self.play(&mut st);
        } else {
            st.outbound = Flow::Blocking;
        }
        self.emit_state(&st);
    }

    /// The sink wants the next chunk.
    pub fn send_samples(&self) {
        let mut st = self.state.lock();
        if st.outbound == Flow::Awaiting {
            st.outbound = Flow::Blocking;
            self.send(&mut st);
        }
    }

    /// A segment arrived from the mix.
    pub fn receive(&self, reply: SegmentReply) {
        let mut st = self.state.lock();
        match st.inbound {
            Flow::Awaiting if reply.generation == st.generation => {
                st.buffer.put(&reply.pcm.samples);
                st.inbound = Flow::Blocking;
                if st.outbound == Flow::Scheduled {
                    st.outbound = Flow::Blocking;
                    self.play(&mut st);
                }
            }
            Flow::Ignoring => {
                log::debug!("discarding stale segment {}", reply.index);
                st.inbound = Flow::Blocking;
            }
            _ => {
                log::debug!(
                    "ignoring segment {} of generation {} (current {})",
                    reply.index,
                    reply.generation,
                    st.generation
                );
                return;
            }
        }
        self.request(&mut st);
    }

    pub fn stop(&self) {
        let mut st = self.state.lock();
        st.outbound = Flow::Blocking;
        self.reset(&mut st, 0);
    }

    /// Continue from the segment at frame `sample`.
    pub fn jump(&self, sample: usize) {
        let mut st = self.state.lock();
        let grid = &st.timeline.grid;
        let num_segments = st.timeline.num_segments;

        let mut index = grid.search_right(sample);
        if index > 0 {
            if index > num_segments || self.config.jump_to == JumpTo::Containing {
                index -= 1;
            } else {
                let offsets = grid.offsets();
                let midpoint = (offsets[index - 1] + offsets[index]) as f64 / 2.0;
                if sample as f64 <= midpoint {
                    index -= 1;
                }
            }
        }
        let index = index.min(num_segments.saturating_sub(1));
        self.reset(&mut st, index);
    }

    /// Skip to the start of the next track.
    pub fn next_track(&self) {
        let mut st = self.state.lock();
        let current = st.current_segment();
        let positions = &st.timeline.track_positions;
        let next = positions.get(positions.partition_point(|p| *p <= current)).copied();
        if let Some(index) = next {
            self.reset(&mut st, index);
        }
    }

    /// Back to the start of the previous track, or of this one when inside it.
    pub fn previous_track(&self) {
        let mut st = self.state.lock();
        let current = st.current_segment();
        let positions = &st.timeline.track_positions;
        let previous = positions
            .get(positions.partition_point(|p| *p < current).saturating_sub(1))
            .copied();
        if let Some(index) = previous {
            self.reset(&mut st, index);
        }
    }

    fn play(&self, st: &mut PlayerState) {
        let filled = st.buffer.filled();
        if filled >= self.config.chunk_samples || (filled > 0 && st.exhausted()) {
            self.send(st);
        } else if st.exhausted() {
            log::debug!("nothing left to play");
            st.outbound = Flow::Blocking;
        } else {
            st.outbound = Flow::Scheduled;
        }
    }

    fn send(&self, st: &mut PlayerState) {
        if st.outbound != Flow::Blocking {
            return;
        }

        let samples = st.buffer.pop(self.config.chunk_samples);
        if samples.is_empty() {
            if st.exhausted() {
                log::info!("end of mix reached");
                st.outbound = Flow::Blocking;
                self.emit_state(st);
            } else {
                st.outbound = Flow::Scheduled;
            }
            self.request(st);
            return;
        }

        st.outbound = Flow::Awaiting;
        st.position += samples.len() / self.config.channels as usize;
        self.link.deliver(PcmBuffer {
            samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            bit_depth: self.config.bit_depth,
        });
        self.link.notify(PlayerEvent::Position(st.position));
        self.request(st);
    }

    /// Ask for the next segment if nothing is in flight and it fits.
    fn request(&self, st: &mut PlayerState) {
        if st.inbound != Flow::Blocking || st.index >= st.timeline.num_segments {
            return;
        }
        let needed = st.timeline.segment_frames(st.index) * self.config.channels as usize;
        if needed <= st.buffer.free() {
            st.inbound = Flow::Awaiting;
            self.link.request_segment(SegmentRequest {
                index: st.index,
                generation: st.generation,
            });
            st.index += 1;
        }
    }

    fn reset(&self, st: &mut PlayerState, index: usize) {
        log::debug!("player reset to segment {index}");
        st.generation += 1;
        st.index = index;
        st.position = st.timeline.sample_offset(index);
        st.buffer.clear();
        if st.inbound == Flow::Awaiting {
            st.inbound = Flow::Ignoring;
        }
        if st.outbound == Flow::Awaiting {
            st.outbound = Flow::Scheduled;
        }
        self.link.notify(PlayerEvent::Position(st.position));
        self.emit_state(st);
        self.request(st);
    }

    fn emit_state(&self, st: &PlayerState) {
        let playing = matches!(st.outbound, Flow::Awaiting | Flow::Scheduled);
        self.link.notify(PlayerEvent::State { playing });
    }
}
