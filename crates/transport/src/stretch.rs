//! Fitting a slice of audio to an exact number of output frames.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use signalsmith_stretch::Stretch;

use crate::{deinterleave, interleave};

/// How a segment is brought to its target length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchMode {
    /// Sinc resampling; pitch follows the tempo change.
    #[default]
    Resample,
    /// Phase-preserving time stretch; pitch is kept.
    Stretch,
}

/// Stretch interleaved `input` to exactly `target_frames` frames.
///
/// Empty input yields silence of the target length.
pub fn time_stretch(
    input: &[f32],
    channels: u16,
    sample_rate: u32,
    target_frames: usize,
    mode: StretchMode,
) -> anyhow::Result<Vec<f32>> {
    let ch = channels as usize;
    let input_frames = input.len() / ch;

    if target_frames == 0 {
        return Ok(Vec::new());
    }
    if input_frames == 0 {
        return Ok(vec![0.0; target_frames * ch]);
    }
    if input_frames == target_frames {
        return Ok(input[..target_frames * ch].to_vec());
    }

    let mut output = match mode {
        StretchMode::Resample => resample_to(input, ch, input_frames, target_frames)?,
        StretchMode::Stretch => stretch_to(input, channels, sample_rate, target_frames),
    };
    output.resize(target_frames * ch, 0.0);
    Ok(output)
}

fn resample_to(
    input: &[f32],
    channels: usize,
    input_frames: usize,
    target_frames: usize,
) -> anyhow::Result<Vec<f32>> {
    let ratio = target_frames as f64 / input_frames as f64;
    let params = SincInterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, input_frames, channels)?;
    let delay = resampler.output_delay();

    let planar = deinterleave(input, channels);
    let mut produced = resampler.process(&planar, None)?;
    // drain the filter tail so the delayed frames at the end are not lost
    while produced[0].len() < delay + target_frames {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, rest) in produced.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }

    let aligned: Vec<Vec<f32>> = produced
        .into_iter()
        .map(|channel| channel.into_iter().skip(delay).collect())
        .collect();
    Ok(interleave(&aligned, target_frames))
}

/// The stretcher lags its input by its input latency (in input frames) plus
/// its output latency. The input is extended by a mirrored tail so the
/// stretcher has content to read ahead into, the tail is flushed, and the
/// leading latency is cut from the output.
fn stretch_to(input: &[f32], channels: u16, sample_rate: u32, target_frames: usize) -> Vec<f32> {
    let ch = channels as usize;
    let input_frames = input.len() / ch;
    let mut stretcher = Stretch::preset_default(channels as u32, sample_rate);

    let input_latency = stretcher.input_latency().min(input_frames);
    let output_latency = stretcher.output_latency();
    let ratio = target_frames as f64 / input_frames as f64;
    let lead = (input_latency as f64 * ratio).round() as usize;

    let mut padded = Vec::with_capacity((input_frames + input_latency) * ch);
    padded.extend_from_slice(&input[..input_frames * ch]);
    for frame in input[..input_frames * ch].chunks_exact(ch).rev().take(input_latency) {
        padded.extend_from_slice(frame);
    }

    let mut output = vec![0.0; (target_frames + lead + output_latency) * ch];
    let (body, tail) = output.split_at_mut((target_frames + lead) * ch);
    stretcher.process(&padded, body);
    stretcher.flush(tail);

    output.drain(..(lead + output_latency) * ch);
    output.truncate(target_frames * ch);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| std::iter::repeat_n(i as f32 / frames as f32, channels))
            .collect()
    }

    #[test]
    fn test_output_has_exact_length() {
        let input = ramp(1000, 2);
        for target in [1, 500, 999, 1001, 1500] {
            let out = time_stretch(&input, 2, 8000, target, StretchMode::Resample).unwrap();
            assert_eq!(out.len(), target * 2, "target {target}");
        }
    }

    #[test]
    fn test_stretch_mode_has_exact_length() {
        let input = ramp(4000, 2);
        let out = time_stretch(&input, 2, 8000, 3000, StretchMode::Stretch).unwrap();
        assert_eq!(out.len(), 6000);
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_stretch_mode_keeps_head_and_tail() {
        let input: Vec<f32> = (0..8000)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin())
            .collect();
        let out = time_stretch(&input, 1, 8000, 6000, StretchMode::Stretch).unwrap();

        assert_eq!(out.len(), 6000);
        // a sine of amplitude 0.5 has an rms of about 0.35
        assert!(rms(&out[..400]) > 0.2, "head rms {}", rms(&out[..400]));
        assert!(rms(&out[5600..]) > 0.1, "tail rms {}", rms(&out[5600..]));
    }

    #[test]
    fn test_equal_length_is_a_copy() {
        let input = ramp(64, 1);
        let out = time_stretch(&input, 1, 8000, 64, StretchMode::Resample).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_empty_input_is_silence() {
        let out = time_stretch(&[], 2, 8000, 10, StretchMode::Resample).unwrap();
        assert_eq!(out, vec![0.0; 20]);
        assert!(time_stretch(&[0.5, 0.5], 2, 8000, 0, StretchMode::Stretch)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resampled_dc_stays_near_level() {
        let input = vec![0.5f32; 2000];
        let out = time_stretch(&input, 1, 8000, 1500, StretchMode::Resample).unwrap();
        // ignore the edges where the sinc window runs off the input
        let middle = &out[200..1300];
        assert!(middle.iter().all(|s| (s - 0.5).abs() < 0.05));
    }

    #[test]
    fn test_mode_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: StretchMode,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"mode":"stretch"}"#).unwrap();
        assert_eq!(parsed.mode, StretchMode::Stretch);
    }
}
