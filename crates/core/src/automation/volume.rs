use beatmix_transport::{AudioArc, db_to_ratio};

use super::{Automation, ControlPoint, Timeline};
use crate::interpolate::Interpolate;

/// Per-frame gain in dB over a track's audio.
///
/// Steps are frames, so a fade can be finer than one beat.
pub struct Volume<'a, T: Timeline> {
    timeline: &'a T,
    audio: &'a AudioArc,
}

impl<'a, T: Timeline> Volume<'a, T> {
    pub fn new(timeline: &'a T, audio: &'a AudioArc) -> Self {
        Self { timeline, audio }
    }
}

impl<T: Timeline> Automation for Volume<'_, T> {
    type Point = f64;
    type Item = f64;
    type Output = AudioArc;

    const ARITY: usize = 1;

    fn parse_point(&self, values: &[String]) -> Option<f64> {
        values.first()?.parse().ok()
    }

    fn timeline_end(&self) -> usize {
        self.timeline.num_segments()
    }

    fn span(&self, from: usize, to: usize) -> usize {
        self.timeline.num_samples(from, to)
    }

    fn expand(&self, from: &ControlPoint<f64>, to: &ControlPoint<f64>, steps: usize) -> Vec<f64> {
        from.value.interpolate(&to.value, steps, from.kind)
    }

    fn empty(&self) -> AudioArc {
        self.audio.clone()
    }

    fn process(&self, gains: Vec<f64>) -> AudioArc {
        let Some(&last) = gains.last() else {
            return self.audio.clone();
        };

        let mut buffer = self.audio.to_audio_buffer();
        let channels = buffer.channels as usize;
        let mut cached = (f64::NAN, 1.0f32);
        for (frame_idx, frame) in buffer.samples.chunks_exact_mut(channels).enumerate() {
            // frames past the curve keep the final level
            let db = gains.get(frame_idx).copied().unwrap_or(last);
            if db != cached.0 {
                cached = (db, db_to_ratio(db) as f32);
            }
            for sample in frame {
                *sample *= cached.1;
            }
        }
        buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::rows;
    use crate::grid::BeatGrid;

    fn setup() -> (BeatGrid, AudioArc) {
        // two segments of 4 frames each
        let grid = BeatGrid::new(vec![0.0, 0.5, 1.0], 8);
        let audio = AudioArc::new(vec![1.0; 16], 8, 2);
        (grid, audio)
    }

    #[test]
    fn test_no_rows_returns_audio_unchanged() {
        let (grid, audio) = setup();
        let out = Volume::new(&grid, &audio).apply(&[]);
        assert_eq!(out.samples(), audio.samples());
    }

    #[test]
    fn test_constant_gain_scales_every_channel() {
        let (grid, audio) = setup();
        let out = Volume::new(&grid, &audio).apply(&rows(&["0 -6"]));
        let expected = db_to_ratio(-6.0) as f32;
        assert!(out.samples().iter().all(|s| (*s - expected).abs() < 1e-6));
        assert_eq!(out.channels(), 2);
    }

    #[test]
    fn test_fade_is_per_frame() {
        let (grid, audio) = setup();
        let out = Volume::new(&grid, &audio).apply(&rows(&["0 0 linear", "1 -40"]));

        let left: Vec<f32> = out.channel(0).collect();
        // frames 0..4 fade from 0 dB towards -40 dB in 10 dB steps
        for (frame, db) in [0.0, -10.0, -20.0, -30.0].into_iter().enumerate() {
            assert!((left[frame] - db_to_ratio(db) as f32).abs() < 1e-6);
        }
        // second segment holds -40 dB
        assert!(left[4..].iter().all(|s| (*s - 0.01).abs() < 1e-6));
    }
}
