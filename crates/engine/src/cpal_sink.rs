use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use beatmix_transport::PcmBuffer;
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};

use crate::{AudioSink, OutputSpec};

/// Seconds of audio the ring between `write` and the device callback holds.
const RING_SECONDS: f64 = 0.5;

/// Output through the default cpal device.
///
/// Written PCM is converted to `f32` and pushed into an rtrb ring that the
/// device callback drains. `cpal::Stream` is not `Send` on every platform, so
/// a `CpalSink` lives on the thread that created it.
pub struct CpalSink {
    spec: Option<OutputSpec>,
    stream: Option<cpal::Stream>,
    producer: Option<rtrb::Producer<f32>>,
    playing: bool,
    underruns: Arc<AtomicU64>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            spec: None,
            stream: None,
            producer: None,
            playing: false,
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Callbacks that found the ring empty while playing.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for CpalSink {
    fn open(&mut self, spec: OutputSpec) -> anyhow::Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device found"))?;
        log::info!(
            "using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let sample_format = device.default_output_config()?.sample_format();
        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity =
            (spec.sample_rate as f64 * RING_SECONDS) as usize * spec.channels as usize;
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let underruns = self.underruns.clone();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, underruns)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, underruns)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, consumer, underruns)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, underruns)?,
            sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
        };
        stream.pause()?;

        self.spec = Some(spec);
        self.stream = Some(stream);
        self.producer = Some(producer);
        self.playing = false;
        Ok(())
    }

    fn write(&mut self, pcm: &[u8]) -> anyhow::Result<()> {
        let (Some(spec), Some(stream), Some(producer)) =
            (self.spec, self.stream.as_ref(), self.producer.as_mut())
        else {
            anyhow::bail!("write to a sink that was never opened");
        };

        let samples =
            PcmBuffer::from_bytes(pcm, spec.sample_rate, spec.channels, spec.bit_depth)?.to_float();

        if !self.playing {
            stream.play()?;
            self.playing = true;
        }

        let mut pending = samples.as_slice();
        while !pending.is_empty() {
            let free = producer.slots();
            if free == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            let n = free.min(pending.len());
            if let Ok(chunk) = producer.write_chunk_uninit(n) {
                chunk.fill_from_iter(pending[..n].iter().copied());
            }
            pending = &pending[n..];
        }
        Ok(())
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        if let Some(stream) = self.stream.as_ref() {
            stream.pause()?;
        }
        self.playing = false;
        Ok(())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: rtrb::Consumer<f32>,
    underruns: Arc<AtomicU64>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut starved = false;
            for sample in data.iter_mut() {
                *sample = match consumer.pop() {
                    Ok(value) => T::from_sample(value),
                    Err(_) => {
                        starved = true;
                        T::from_sample(0.0)
                    }
                };
            }
            if starved {
                underruns.fetch_add(1, Ordering::Relaxed);
            }
        },
        |err| log::error!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
