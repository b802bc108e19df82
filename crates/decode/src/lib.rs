use std::fs::File;
use std::path::Path;

use beatmix_transport::{AudioArc, AudioBuffer, db_to_ratio, resample_audio_arc};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate and channel layout decoded audio is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Part of a source to keep, in seconds of the source's own timeline.
///
/// `stop: None` keeps everything after `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Window {
    pub start: f64,
    pub stop: Option<f64>,
}

/// Decode a whole file at its native rate and layout.
pub fn decode_file(path: &Path) -> anyhow::Result<AudioBuffer> {
    if !path.exists() {
        anyhow::bail!("audio file not found: {}", path.display());
    }
    decode_file_direct(path)
}

fn decode_file_direct(path: &Path) -> anyhow::Result<AudioBuffer> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Cut `window` out of `audio`, rounding the bounds to the nearest frame.
pub fn cut(audio: &AudioBuffer, window: Window) -> AudioBuffer {
    let rate = audio.sample_rate as f64;
    let frames = audio.frames();
    let start = ((window.start.max(0.0) * rate).round() as usize).min(frames);
    let stop = window
        .stop
        .map(|stop| (stop.max(0.0) * rate).round() as usize)
        .unwrap_or(frames)
        .clamp(start, frames);
    let ch = audio.channels as usize;
    AudioBuffer {
        samples: audio.samples[start * ch..stop * ch].to_vec(),
        sample_rate: audio.sample_rate,
        channels: audio.channels,
    }
}

/// Change the channel count.
///
/// Upmixing repeats source channels in order, downmixing averages the source
/// channels folded onto each output channel.
pub fn remix(audio: &AudioBuffer, channels: u16) -> AudioBuffer {
    let src = audio.channels as usize;
    let dst = channels as usize;
    if src == dst {
        return audio.clone();
    }

    let mut samples = Vec::with_capacity(audio.frames() * dst);
    for frame in audio.samples.chunks_exact(src) {
        if dst > src {
            samples.extend((0..dst).map(|ch| frame[ch % src]));
        } else {
            for out in 0..dst {
                let (sum, count) = frame
                    .iter()
                    .enumerate()
                    .filter(|(ch, _)| ch % dst == out)
                    .fold((0.0f32, 0u32), |(sum, count), (_, s)| (sum + s, count + 1));
                samples.push(sum / count as f32);
            }
        }
    }

    AudioBuffer {
        samples,
        sample_rate: audio.sample_rate,
        channels,
    }
}

/// Decode the `window` of a file and convert it to `target` with a gain in dB.
pub fn load_window(
    path: &Path,
    window: Window,
    target: TargetFormat,
    gain_db: f64,
) -> anyhow::Result<AudioArc> {
    let decoded = decode_file(path)?;
    prepare(&decoded, window, target, gain_db)
}

/// The conversion half of [`load_window`] for audio that is already in memory.
pub fn prepare(
    audio: &AudioBuffer,
    window: Window,
    target: TargetFormat,
    gain_db: f64,
) -> anyhow::Result<AudioArc> {
    let windowed = remix(&cut(audio, window), target.channels);
    let mut buffer = resample_audio_arc(&windowed.freeze(), target.sample_rate)?.to_audio_buffer();
    if gain_db != 0.0 {
        buffer.scale(db_to_ratio(gain_db) as f32);
    }
    Ok(buffer.freeze())
}
