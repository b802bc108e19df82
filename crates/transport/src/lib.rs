use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

pub mod pcm;
pub mod stretch;
pub mod time;

pub use pcm::{BitDepth, FormatError, PcmBuffer};
pub use stretch::{StretchMode, time_stretch};
pub use time::{bpm_to_time, db_to_ratio, format_clock, parse_clock, time_to_bpm};

/// Owned, mutable audio used while a buffer is still being built.
///
/// Arithmetic on an `AudioBuffer` keeps its sample rate and channel count.
/// Call [`AudioBuffer::freeze`] once processing is done to get a shareable
/// read-only [`AudioArc`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Silent buffer holding `frames` frames.
    pub fn zeros(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Add `other` sample-wise into this buffer, up to the shorter of the two.
    ///
    /// Both buffers must share the channel layout.
    pub fn accumulate(&mut self, other: &[f32]) {
        for (dst, src) in self.samples.iter_mut().zip(other) {
            *dst += *src;
        }
    }

    /// Multiply every sample by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Limit every sample to [-1, 1].
    pub fn clip(&mut self) {
        for sample in &mut self.samples {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    /// Quantize to integer PCM at the given bit depth.
    pub fn quantize(&self, bit_depth: BitDepth) -> PcmBuffer {
        PcmBuffer::from_float(&self.samples, self.sample_rate, self.channels, bit_depth)
    }

    /// Finish editing and share the samples immutably.
    pub fn freeze(self) -> AudioArc {
        AudioArc::new(self.samples, self.sample_rate, self.channels)
    }
}

/// Decoded track audio, shared read-only between the mix, the beat worker
/// and segment rendering.
///
/// Samples are interleaved and live in one `Arc<[f32]>`, so a clone is a
/// refcount bump.
///
/// ```
/// use beatmix_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// assert_eq!(audio.frames(), 2);
/// assert_eq!(audio.duration_secs(), 2.0 / 44100.0);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// When `channels` is 0 or does not divide the sample count.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::from_arc(Arc::from(samples), sample_rate, channels)
    }

    /// Wrap samples that are already shared. Same panics as [`AudioArc::new`].
    pub fn from_arc(samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Interleaved sample count.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Interleaved samples of the frame range `[start, stop)`, clamped to the audio.
    pub fn frame_range(&self, start: usize, stop: usize) -> &[f32] {
        let channels = self.channels as usize;
        let stop = stop.min(self.frames());
        let start = start.min(stop);
        &self.samples[start * channels..stop * channels]
    }

    /// Samples of a single channel. Panics on an out of range `channel`.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        assert!(
            channel < self.channels as usize,
            "channel index out of bounds"
        );
        let channels = self.channels as usize;
        (0..self.frames()).map(move |frame| self.samples[frame * channels + channel])
    }

    /// Convert to `target_sample_rate`, sharing the samples when nothing changes.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        resample_audio_arc(self, target_sample_rate)
    }

    /// Copy the samples into an owned buffer for further editing.
    pub fn to_audio_buffer(&self) -> AudioBuffer {
        AudioBuffer {
            samples: self.samples.to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl From<AudioBuffer> for AudioArc {
    fn from(buffer: AudioBuffer) -> Self {
        buffer.freeze()
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

pub(crate) fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

pub(crate) fn interleave(planar: &[Vec<f32>], frames: usize) -> Vec<f32> {
    let channels = planar.len();
    let mut samples = Vec::with_capacity(frames * channels);
    for frame_idx in 0..frames {
        for channel in planar {
            samples.push(channel.get(frame_idx).copied().unwrap_or(0.0));
        }
    }
    samples
}

/// Band-limited sinc conversion of a whole track to the mix sample rate.
///
/// ```
/// use beatmix_transport::{AudioArc, resample_audio_arc};
///
/// let audio = AudioArc::new(vec![0.0; 22050], 22050, 1);
/// let resampled = resample_audio_arc(&audio, 44100).unwrap();
/// assert_eq!(resampled.sample_rate(), 44100);
/// ```
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate || audio.is_empty() {
        return Ok(AudioArc::from_arc(
            audio.samples.clone(),
            target_sample_rate,
            audio.channels,
        ));
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    let resample_ratio = target_sample_rate as f64 / audio.sample_rate as f64;
    let output_frames = (input_frames as f64 * resample_ratio).ceil() as usize;

    let input_channels = deinterleave(audio.samples(), channels);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;

    let output_channels = resampler.process(&input_channels, None)?;
    let produced = output_channels[0].len();

    Ok(AudioArc::new(
        interleave(&output_channels, produced.min(output_frames)),
        target_sample_rate,
        audio.channels,
    ))
}
