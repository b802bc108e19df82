use std::f64::consts::{FRAC_1_SQRT_2, PI};

use beatmix_transport::{AudioArc, db_to_ratio};

use super::{Automation, ControlPoint};
use crate::grid::BeatGrid;
use crate::interpolate::Interpolate;

const BASS_CUTOFF: f64 = 1000.0;
const TREBLE_CUTOFF: f64 = 8000.0;

/// Three-band shelving EQ with bass/mid/treble gains in dB per segment.
///
/// Mid scales the whole signal; bass and treble are applied relative to it
/// through a low shelf and a high shelf. Filter state runs on across segment
/// boundaries.
pub struct Equalizer<'a> {
    grid: &'a BeatGrid,
    audio: &'a AudioArc,
}

impl<'a> Equalizer<'a> {
    pub fn new(grid: &'a BeatGrid, audio: &'a AudioArc) -> Self {
        Self { grid, audio }
    }
}

/// Normalized second-order section `[b0, b1, b2, a1, a2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad([f64; 5]);

impl Biquad {
    fn shelf(sample_rate: f64, cutoff: f64, gain_db: f64, high: bool) -> Self {
        // keep the corner below Nyquist at low mix rates
        let cutoff = cutoff.min(sample_rate * 0.45);
        let a = db_to_ratio(gain_db).sqrt();
        let omega = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = omega.sin_cos();
        let gamma = a.sqrt() / FRAC_1_SQRT_2 * sin;
        let (ap, am) = (a + 1.0, a - 1.0);

        let (b0, b1, b2, a0, a1, a2) = if high {
            (
                a * (ap + am * cos + gamma),
                -2.0 * a * (am + ap * cos),
                a * (ap + am * cos - gamma),
                ap - am * cos + gamma,
                2.0 * (am - ap * cos),
                ap - am * cos - gamma,
            )
        } else {
            (
                a * (ap - am * cos + gamma),
                2.0 * a * (am - ap * cos),
                a * (ap - am * cos - gamma),
                ap + am * cos + gamma,
                -2.0 * (am + ap * cos),
                ap + am * cos - gamma,
            )
        };
        Self([b0 / a0, b1 / a0, b2 / a0, a1 / a0, a2 / a0])
    }

    /// Transposed direct form II step.
    #[inline]
    fn tick(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let [b0, b1, b2, a1, a2] = self.0;
        let y = b0 * x + z[0];
        z[0] = b1 * x - a1 * y + z[1];
        z[1] = b2 * x - a2 * y;
        y
    }
}

impl Automation for Equalizer<'_> {
    type Point = [f64; 3];
    type Item = [f64; 3];
    type Output = AudioArc;

    const ARITY: usize = 3;

    fn parse_point(&self, values: &[String]) -> Option<[f64; 3]> {
        if values.len() < 3 {
            return None;
        }
        Some([
            values[0].parse().ok()?,
            values[1].parse().ok()?,
            values[2].parse().ok()?,
        ])
    }

    fn timeline_end(&self) -> usize {
        self.grid.num_segments()
    }

    fn expand(
        &self,
        from: &ControlPoint<[f64; 3]>,
        to: &ControlPoint<[f64; 3]>,
        steps: usize,
    ) -> Vec<[f64; 3]> {
        from.value.interpolate(&to.value, steps, from.kind)
    }

    fn empty(&self) -> AudioArc {
        self.audio.clone()
    }

    fn process(&self, gains: Vec<[f64; 3]>) -> AudioArc {
        if gains.is_empty() {
            return self.audio.clone();
        }

        let mut buffer = self.audio.to_audio_buffer();
        let channels = buffer.channels as usize;
        let frames = buffer.frames();
        let sample_rate = buffer.sample_rate as f64;
        // [channel][section] delay lines
        let mut state = vec![[[0.0f64; 2]; 2]; channels];

        for (segment, [bass, mid, treble]) in gains.into_iter().enumerate() {
            let start = self.grid.sample_offset(segment).min(frames);
            let stop = self.grid.sample_offset(segment + 1).min(frames);
            let sections = [
                Biquad::shelf(sample_rate, BASS_CUTOFF, bass - mid, false),
                Biquad::shelf(sample_rate, TREBLE_CUTOFF, treble - mid, true),
            ];
            let level = db_to_ratio(mid);

            for frame in buffer.samples[start * channels..stop * channels].chunks_exact_mut(channels) {
                for (sample, delays) in frame.iter_mut().zip(state.iter_mut()) {
                    let mut x = *sample as f64 * level;
                    for (section, z) in sections.iter().zip(delays.iter_mut()) {
                        x = section.tick(x, z);
                    }
                    *sample = x as f32;
                }
            }
        }
        buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::rows;

    fn grid_and_tone(frequency: f64) -> (BeatGrid, AudioArc) {
        let sample_rate = 44100;
        let grid = BeatGrid::new(vec![0.0, 0.25, 0.5], sample_rate);
        let samples: Vec<f32> = (0..sample_rate as usize / 2)
            .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        (grid, AudioArc::new(samples, sample_rate, 1))
    }

    fn rms(samples: &[f32]) -> f64 {
        (samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_flat_gains_are_transparent() {
        let (grid, audio) = grid_and_tone(440.0);
        let out = Equalizer::new(&grid, &audio).apply(&rows(&["0 0 0 0"]));
        for (a, b) in out.samples().iter().zip(audio.samples()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_mid_scales_everything() {
        let (grid, audio) = grid_and_tone(440.0);
        let out = Equalizer::new(&grid, &audio).apply(&rows(&["0 -6 -6 -6"]));
        let ratio = rms(out.samples()) / rms(audio.samples());
        assert!((ratio - db_to_ratio(-6.0)).abs() < 1e-3, "ratio {ratio}");
    }

    #[test]
    fn test_bass_cut_attenuates_low_tone() {
        let (grid, audio) = grid_and_tone(60.0);
        let out = Equalizer::new(&grid, &audio).apply(&rows(&["0 -24 0 0"]));
        // skip the filter's settling time
        let tail = 4410..audio.len();
        let ratio = rms(&out.samples()[tail.clone()]) / rms(&audio.samples()[tail]);
        assert!(ratio < 0.15, "ratio {ratio}");
    }

    #[test]
    fn test_treble_cut_leaves_low_tone() {
        let (grid, audio) = grid_and_tone(60.0);
        let out = Equalizer::new(&grid, &audio).apply(&rows(&["0 0 0 -24"]));
        let ratio = rms(out.samples()) / rms(audio.samples());
        assert!((ratio - 1.0).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn test_treble_shelf_stays_stable_at_low_rates() {
        for sample_rate in [8000.0, 16000.0] {
            let Biquad([b0, b1, b2, a1, a2]) = Biquad::shelf(sample_rate, TREBLE_CUTOFF, -12.0, true);
            assert!([b0, b1, b2, a1, a2].iter().all(|c| c.is_finite()));
            assert!(a2.abs() < 1.0 && a1.abs() < 1.0 + a2, "rate {sample_rate}");
        }

        let sample_rate = 8000;
        let grid = BeatGrid::new(vec![0.0, 0.25, 0.5], sample_rate);
        let samples: Vec<f32> = (0..sample_rate as usize / 2)
            .map(|i| (2.0 * PI * 200.0 * i as f64 / sample_rate as f64).sin() as f32)
            .collect();
        let audio = AudioArc::new(samples, sample_rate, 1);
        let out = Equalizer::new(&grid, &audio).apply(&rows(&["0 0 0 -24"]));

        assert!(out.samples().iter().all(|s| s.is_finite()));
        let ratio = rms(out.samples()) / rms(audio.samples());
        assert!((ratio - 1.0).abs() < 0.1, "ratio {ratio}");
    }

    #[test]
    fn test_no_rows_returns_audio_unchanged() {
        let (grid, audio) = grid_and_tone(440.0);
        let out = Equalizer::new(&grid, &audio).apply(&[]);
        assert_eq!(out.samples(), audio.samples());
    }
}
