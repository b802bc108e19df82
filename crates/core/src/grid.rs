use std::sync::Arc;

use beatmix_transport::time_to_bpm;

use crate::automation::Timeline;

/// Increasing beat times in seconds and their frame offsets at one sample rate.
///
/// A grid is never edited; a changed tempo produces a new one. Cloning shares
/// the underlying arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    times: Arc<[f64]>,
    offsets: Arc<[usize]>,
    sample_rate: u32,
}

impl BeatGrid {
    pub fn new(times: Vec<f64>, sample_rate: u32) -> Self {
        let offsets: Vec<usize> = times
            .iter()
            .map(|t| (t * sample_rate as f64).round().max(0.0) as usize)
            .collect();
        Self {
            times: times.into(),
            offsets: offsets.into(),
            sample_rate,
        }
    }

    /// Grid with its first beat moved to zero.
    pub fn relative(times: &[f64], sample_rate: u32) -> Self {
        let first = times.first().copied().unwrap_or(0.0);
        Self::new(times.iter().map(|t| t - first).collect(), sample_rate)
    }

    /// A single beat at zero: no segments.
    pub fn empty(sample_rate: u32) -> Self {
        Self::new(vec![0.0], sample_rate)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of beats.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn num_segments(&self) -> usize {
        self.times.len().saturating_sub(1)
    }

    /// Seconds from beat `index` to the next one.
    pub fn duration(&self, index: usize) -> f64 {
        self.times[index + 1] - self.times[index]
    }

    pub fn mean_duration(&self) -> Option<f64> {
        let segments = self.num_segments();
        (segments > 0).then(|| (self.times[segments] - self.times[0]) / segments as f64)
    }

    /// Tempo from the mean beat length.
    pub fn bpm(&self) -> Option<f64> {
        self.mean_duration().map(time_to_bpm)
    }

    /// Frame offset of beat `index`, clamped to the last beat.
    pub fn sample_offset(&self, index: usize) -> usize {
        match self.offsets.len() {
            0 => 0,
            len => self.offsets[index.min(len - 1)],
        }
    }

    /// Beat index after which `sample` lies (numpy's `searchsorted(.., 'right')`).
    pub fn search_right(&self, sample: usize) -> usize {
        self.offsets.partition_point(|offset| *offset <= sample)
    }
}

impl Timeline for BeatGrid {
    fn num_segments(&self) -> usize {
        BeatGrid::num_segments(self)
    }

    fn num_samples(&self, start: usize, stop: usize) -> usize {
        self.sample_offset(stop)
            .saturating_sub(self.sample_offset(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_round_to_nearest_frame() {
        let grid = BeatGrid::new(vec![0.0, 0.50006, 1.00001], 10_000);
        assert_eq!(grid.offsets(), &[0, 5001, 10000]);
        assert_eq!(grid.num_segments(), 2);
        assert_eq!(Timeline::num_samples(&grid, 0, 2), 10000);
    }

    #[test]
    fn test_relative_grid_starts_at_zero() {
        let grid = BeatGrid::relative(&[10.0, 10.5, 11.0], 100);
        assert_eq!(grid.times(), &[0.0, 0.5, 1.0]);
        assert_eq!(grid.offsets(), &[0, 50, 100]);
    }

    #[test]
    fn test_bpm_from_mean_duration() {
        let grid = BeatGrid::new(vec![0.0, 0.4, 1.0, 1.5], 100);
        assert_eq!(grid.bpm(), Some(120.0));
        assert_eq!(BeatGrid::empty(100).bpm(), None);
    }

    #[test]
    fn test_search_right() {
        let grid = BeatGrid::new(vec![0.0, 1.0, 2.0], 10);
        assert_eq!(grid.search_right(0), 1);
        assert_eq!(grid.search_right(9), 1);
        assert_eq!(grid.search_right(10), 2);
        assert_eq!(grid.search_right(100), 3);
    }
}
