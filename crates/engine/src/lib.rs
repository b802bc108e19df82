mod cpal_sink;

use std::time::{Duration, Instant};

use beatmix_transport::BitDepth;

pub use cpal_sink::CpalSink;

/// Format of the PCM bytes handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: BitDepth,
}

impl OutputSpec {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bit_depth.bytes()
    }

    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Push-based consumer of little-endian integer PCM.
///
/// `write` may block until the device has room; it returns once the bytes are
/// queued. A write after `pause` resumes output.
pub trait AudioSink {
    fn open(&mut self, spec: OutputSpec) -> anyhow::Result<()>;
    fn write(&mut self, pcm: &[u8]) -> anyhow::Result<()>;
    fn pause(&mut self) -> anyhow::Result<()>;
}

/// Sink without a device that consumes bytes at the real-time rate.
///
/// A write returns once everything written before it would have finished
/// playing, so at most one write is ever queued ahead of the clock.
#[derive(Debug, Default)]
pub struct NullSink {
    spec: Option<OutputSpec>,
    clock: Option<Instant>,
    queued: Duration,
    bytes_written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl AudioSink for NullSink {
    fn open(&mut self, spec: OutputSpec) -> anyhow::Result<()> {
        log::info!(
            "null output opened: {} Hz, {} channels, {}",
            spec.sample_rate,
            spec.channels,
            spec.bit_depth
        );
        self.spec = Some(spec);
        self.clock = None;
        self.queued = Duration::ZERO;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> anyhow::Result<()> {
        let spec = self
            .spec
            .ok_or_else(|| anyhow::anyhow!("write to a sink that was never opened"))?;

        let clock = *self.clock.get_or_insert_with(Instant::now);
        let due = clock + self.queued;
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }

        self.queued += spec.duration_of(pcm.len());
        self.bytes_written += pcm.len() as u64;
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        self.clock = None;
        self.queued = Duration::ZERO;
        Ok(())
    }
}
