use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use beatmix_project::{AutomationFile, MixDescription, Row, load_mix_description};
use beatmix_render::WavRenderer;
use beatmix_transport::{AudioBuffer, PcmBuffer, time_stretch};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use rayon::prelude::*;

use crate::automation::{Automation, MasterTrack, Tempo, Timeline, truncate_tempo_rows};
use crate::beats::BeatJob;
use crate::config::MixSettings;
use crate::error::MixError;
use crate::grid::BeatGrid;
use crate::track::{Track, TrackSpec};

/// Tracks and tempo of a mix, ready to be loaded.
#[derive(Debug, Clone, Default)]
pub struct MixSpec {
    pub tracks: Vec<(String, TrackSpec)>,
    /// Rows of the `Tempo` section; `None` follows the earliest track.
    pub tempo: Option<Vec<Row>>,
}

impl MixSpec {
    pub fn from_description(description: &MixDescription) -> Result<Self, MixError> {
        let mut tracks = Vec::with_capacity(description.tracks.len());
        for (name, track) in &description.tracks {
            tracks.push((name.clone(), TrackSpec::from_description(track)?));
        }

        let automation = description
            .automation
            .as_deref()
            .map(AutomationFile::load)
            .transpose()?
            .unwrap_or_default();
        let tempo = automation
            .contains("Tempo")
            .then(|| automation.section("Tempo").to_vec());

        Ok(Self { tracks, tempo })
    }

    pub fn load(path: &Path) -> Result<Self, MixError> {
        Self::from_description(&load_mix_description(path)?)
    }
}

/// Grid geometry of a mix at one point in time.
///
/// Published after every grid update so readers never need the mix lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSnapshot {
    pub grid: BeatGrid,
    /// Segments that can be synthesized right now.
    pub num_segments: usize,
    /// Sorted distinct positions of the initialized tracks.
    pub track_positions: Vec<usize>,
    pub channels: u16,
}

impl TimelineSnapshot {
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self {
            grid: BeatGrid::empty(sample_rate),
            num_segments: 0,
            track_positions: Vec::new(),
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.grid.sample_rate()
    }

    /// Frame offset of the start of segment `index`.
    pub fn sample_offset(&self, index: usize) -> usize {
        self.grid.sample_offset(index)
    }

    pub fn segment_frames(&self, index: usize) -> usize {
        self.grid.num_samples(index, index + 1)
    }
}

impl Timeline for TimelineSnapshot {
    fn num_segments(&self) -> usize {
        self.num_segments
    }

    fn num_samples(&self, start: usize, stop: usize) -> usize {
        self.grid.num_samples(start, stop)
    }
}

#[derive(Debug, Default)]
struct MixState {
    tracks: Vec<Track>,
    tempo: Option<Vec<Row>>,
}

/// Guard over the whole mix. Mix methods called while it is held re-enter it.
pub struct MixLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<MixState>>,
}

/// All tracks on one tempo grid, synthesized segment by segment.
pub struct Mix {
    format: MixSettings,
    state: ReentrantMutex<RefCell<MixState>>,
    timeline: RwLock<Arc<TimelineSnapshot>>,
}

impl Mix {
    pub fn new(format: MixSettings) -> Self {
        let empty = TimelineSnapshot::empty(format.sample_rate, format.channels);
        Self {
            format,
            state: ReentrantMutex::new(RefCell::new(MixState::default())),
            timeline: RwLock::new(Arc::new(empty)),
        }
    }

    pub fn format(&self) -> &MixSettings {
        &self.format
    }

    /// Hold the mix across a compound operation.
    pub fn lock(&self) -> MixLock<'_> {
        MixLock {
            _guard: self.state.lock(),
        }
    }

    pub fn timeline(&self) -> Arc<TimelineSnapshot> {
        self.timeline.read().clone()
    }

    pub fn num_segments(&self) -> usize {
        self.timeline.read().num_segments
    }

    /// Names of the tracks in load order.
    pub fn track_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let state = state.borrow();
        state.tracks.iter().map(|track| track.name().to_string()).collect()
    }

    pub fn is_initialized(&self, name: &str) -> Option<bool> {
        let state = self.state.lock();
        let state = state.borrow();
        state
            .tracks
            .iter()
            .find(|track| track.name() == name)
            .map(Track::initialized)
    }

    /// Replace the mix with `spec`.
    ///
    /// Tracks with known beats are initialized right away; one job per
    /// remaining track is returned, earliest position first.
    pub fn load(&self, spec: MixSpec) -> Vec<BeatJob> {
        let guard = self.state.lock();
        let mut jobs = Vec::new();
        {
            let mut state = guard.borrow_mut();
            state.tracks.clear();
            state.tempo = spec.tempo;

            for (name, track_spec) in spec.tracks {
                let beats = track_spec.beats.clone();
                let mut track = Track::new(name, track_spec);
                match beats {
                    Some(beats) => {
                        if let Err(err) = track.init(&beats, &self.format) {
                            log::error!("dropping track '{}': {err}", track.name());
                            continue;
                        }
                    }
                    None => jobs.push(BeatJob {
                        track: track.name().to_string(),
                        position: track.position(),
                        source: track.spec().source.clone(),
                    }),
                }
                state.tracks.push(track);
            }
            log::info!(
                "mix loaded with {} tracks, {} awaiting beats",
                state.tracks.len(),
                jobs.len()
            );
        }
        jobs.sort_by_key(|job| job.position);
        self.update();
        jobs
    }

    /// Initialize a track from its detected beats and recompute the grid.
    ///
    /// A track that fails to initialize is removed from the mix. Beats for a
    /// track that already has them are rejected.
    pub fn receive_beats(&self, name: &str, beats: &[f64]) -> Result<(), MixError> {
        let guard = self.state.lock();
        let result = {
            let mut state = guard.borrow_mut();
            let index = state
                .tracks
                .iter()
                .position(|track| track.name() == name)
                .ok_or_else(|| MixError::UnknownTrack(name.to_string()))?;
            if state.tracks[index].initialized() {
                log::warn!("ignoring repeated beats for '{name}'");
                return Err(MixError::AlreadyInitialized(name.to_string()));
            }

            let result = state.tracks[index].init(beats, &self.format);
            if let Err(err) = &result {
                log::error!("dropping track '{name}': {err}");
                state.tracks.remove(index);
            }
            result
        };
        self.update();
        result
    }

    /// Remove a track whose beats could not be detected.
    pub fn drop_track(&self, name: &str) -> Result<(), MixError> {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            let index = state
                .tracks
                .iter()
                .position(|track| track.name() == name)
                .ok_or_else(|| MixError::UnknownTrack(name.to_string()))?;
            state.tracks.remove(index);
        }
        log::error!("dropped track '{name}'");
        self.update();
        Ok(())
    }

    /// Recompute the global grid from the initialized tracks and publish it.
    pub fn update(&self) -> Arc<TimelineSnapshot> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let snapshot = Arc::new(self.compute_timeline(&state));
        log::debug!(
            "grid updated: {} segments of {} beats",
            snapshot.num_segments,
            snapshot.grid.len()
        );
        *self.timeline.write() = snapshot.clone();
        snapshot
    }

    fn compute_timeline(&self, state: &MixState) -> TimelineSnapshot {
        let pending = |name: &str| {
            state
                .tracks
                .iter()
                .any(|track| track.name() == name && !track.initialized())
        };

        let fallback;
        let rows: &[Row] = match &state.tempo {
            Some(rows) => rows,
            None => {
                fallback = state
                    .tracks
                    .iter()
                    .min_by_key(|track| track.position())
                    .map(|track| vec![vec!["0".to_string(), track.name().to_string(), "0%".to_string()]])
                    .unwrap_or_default();
                &fallback
            }
        };
        let rows = truncate_tempo_rows(rows, pending);

        let masters: HashMap<String, MasterTrack> = state
            .tracks
            .iter()
            .filter_map(|track| {
                let grid = track.grid()?.clone();
                Some((track.name().to_string(), MasterTrack::new(track.position(), grid)?))
            })
            .collect();
        let grid = BeatGrid::new(Tempo::new(&masters).apply(rows), self.format.sample_rate);

        let num_segments = state
            .tracks
            .iter()
            .filter(|track| !track.initialized())
            .map(Track::position)
            .chain(std::iter::once(grid.num_segments()))
            .min()
            .unwrap_or(0);

        let mut track_positions: Vec<usize> = state
            .tracks
            .iter()
            .filter(|track| track.initialized())
            .map(Track::position)
            .collect();
        track_positions.sort_unstable();
        track_positions.dedup();

        TimelineSnapshot {
            grid,
            num_segments,
            track_positions,
            channels: self.format.channels,
        }
    }

    /// Synthesize segment `index`: every covering track stretched to the
    /// segment's length, summed, clipped and quantized.
    ///
    /// Out of range segments give an empty buffer.
    pub fn segment(&self, index: usize) -> Result<PcmBuffer, MixError> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let timeline = self.timeline();
        let format = &self.format;

        if index >= timeline.num_segments {
            return Ok(PcmBuffer::empty(format.sample_rate, format.channels, format.bit_depth));
        }

        let frames = timeline.segment_frames(index);
        let sources: Vec<&[f32]> = state
            .tracks
            .iter()
            .filter_map(|track| track.segment(index))
            .collect();

        let stretched = sources
            .par_iter()
            .map(|samples| {
                time_stretch(samples, format.channels, format.sample_rate, frames, format.stretch)
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|source| MixError::Stretch { index, source })?;

        let mut mixed = AudioBuffer::zeros(frames, format.sample_rate, format.channels);
        for samples in &stretched {
            mixed.accumulate(samples);
        }
        mixed.clip();
        Ok(mixed.quantize(format.bit_depth))
    }

    /// Write every available segment to a WAV file. Returns the frame count.
    pub fn render(&self, path: &Path) -> Result<u64, MixError> {
        let _lock = self.lock();
        let format = &self.format;
        let mut renderer =
            WavRenderer::create(path, format.sample_rate, format.channels, format.bit_depth)
                .map_err(MixError::Render)?;

        let num_segments = self.num_segments();
        for index in 0..num_segments {
            renderer.write(&self.segment(index)?).map_err(MixError::Render)?;
        }
        let frames = renderer.finalize().map_err(MixError::Render)?;
        log::info!(
            "rendered {num_segments} segments ({frames} frames) to {}",
            path.display()
        );
        Ok(frames)
    }
}

impl Timeline for Mix {
    fn num_segments(&self) -> usize {
        Mix::num_segments(self)
    }

    fn num_samples(&self, start: usize, stop: usize) -> usize {
        self.timeline().num_samples(start, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::rows;
    use crate::track::TrackSource;
    use beatmix_transport::{AudioArc, BitDepth, StretchMode, db_to_ratio};
    use tempfile::tempdir;

    const RATE: u32 = 8000;

    fn format() -> MixSettings {
        MixSettings {
            sample_rate: RATE,
            channels: 1,
            bit_depth: BitDepth::Sixteen,
            stretch: StretchMode::Resample,
        }
    }

    /// A steady tone long enough for `seconds`.
    fn tone(level: f32, seconds: f64) -> AudioArc {
        let frames = (seconds * RATE as f64) as usize;
        let samples = (0..frames)
            .map(|i| level * (i as f32 * 0.05).sin())
            .collect();
        AudioArc::new(samples, RATE, 1)
    }

    fn spec(audio: AudioArc, position: usize, beats: Option<Vec<f64>>) -> TrackSpec {
        let mut spec = TrackSpec::new(TrackSource::Memory(audio), position);
        spec.beats = beats;
        spec
    }

    fn two_track_mix() -> Mix {
        let mut b = spec(tone(0.5, 3.0), 2, Some(vec![0.0, 0.5, 1.0, 1.5]));
        b.automation.insert("Volume", rows(&["0 -6"]));

        let mix = Mix::new(format());
        let jobs = mix.load(MixSpec {
            tracks: vec![
                ("a".to_string(), spec(tone(0.5, 3.0), 0, Some(vec![0.0, 0.5, 1.0, 1.5, 2.0]))),
                ("b".to_string(), b),
            ],
            tempo: Some(rows(&["0 a 0%"])),
        });
        assert!(jobs.is_empty());
        mix
    }

    #[test]
    fn test_empty_mix_has_no_segments() {
        let mix = Mix::new(format());
        assert_eq!(mix.num_segments(), 0);
        assert!(mix.segment(0).expect("segment").is_empty());
    }

    #[test]
    fn test_segment_sums_covering_tracks() {
        let mix = two_track_mix();
        let timeline = mix.timeline();
        // b runs one segment past a
        assert_eq!(timeline.num_segments, 5);
        assert_eq!(timeline.track_positions, vec![0, 2]);
        assert_eq!(timeline.segment_frames(2), 4000);

        let (a_audio, b_audio) = (tone(0.5, 3.0), tone(0.5, 3.0));
        let gain = db_to_ratio(-6.0) as f32;
        let expected: Vec<f32> = a_audio
            .frame_range(8000, 12000)
            .iter()
            .zip(b_audio.frame_range(0, 4000))
            .map(|(a, b)| (a + b * gain).clamp(-1.0, 1.0))
            .collect();
        let expected = PcmBuffer::from_float(&expected, RATE, 1, BitDepth::Sixteen);

        let segment = mix.segment(2).expect("segment");
        assert_eq!(segment.len(), 4000);
        for (got, want) in segment.samples.iter().zip(&expected.samples) {
            assert!((got - want).abs() <= 1, "{got} vs {want}");
        }
    }

    #[test]
    fn test_segment_past_the_end_is_empty() {
        let mix = two_track_mix();
        assert!(!mix.segment(4).expect("segment").is_empty());
        assert!(mix.segment(5).expect("segment").is_empty());
        assert!(mix.segment(100).expect("segment").is_empty());
    }

    #[test]
    fn test_pending_track_caps_segments() {
        let mix = Mix::new(format());
        let jobs = mix.load(MixSpec {
            tracks: vec![
                ("a".to_string(), spec(tone(0.5, 3.0), 0, Some(vec![0.0, 0.5, 1.0, 1.5, 2.0]))),
                ("b".to_string(), spec(tone(0.5, 3.0), 2, None)),
            ],
            tempo: Some(rows(&["0 a 0%", "3 b 0%"])),
        });

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].track, "b");
        // rows stop before b and b's position caps the grid
        assert_eq!(mix.num_segments(), 2);
        assert_eq!(mix.is_initialized("b"), Some(false));

        mix.receive_beats("b", &[0.0, 0.25, 0.5, 0.75, 1.0]).expect("beats");
        assert_eq!(mix.is_initialized("b"), Some(true));
        // a for 0..3, then b's last three beats
        assert_eq!(mix.num_segments(), 6);
        assert_eq!(mix.timeline().segment_frames(4), 2000);
    }

    #[test]
    fn test_failed_track_is_removed() {
        let mix = Mix::new(format());
        mix.load(MixSpec {
            tracks: vec![
                ("a".to_string(), spec(tone(0.5, 3.0), 0, Some(vec![0.0, 0.5, 1.0]))),
                ("b".to_string(), spec(tone(0.5, 3.0), 1, None)),
            ],
            tempo: None,
        });
        assert_eq!(mix.num_segments(), 1);

        assert!(matches!(mix.receive_beats("b", &[0.0]), Err(MixError::NoBeats(_))));
        assert_eq!(mix.track_names(), vec!["a".to_string()]);
        assert_eq!(mix.num_segments(), 2);
    }

    #[test]
    fn test_repeated_beats_are_ignored() {
        let mix = two_track_mix();
        let before = mix.timeline();

        let beats: Vec<f64> = (0..9).map(|i| i as f64 * 0.25).collect();
        assert!(matches!(
            mix.receive_beats("a", &beats),
            Err(MixError::AlreadyInitialized(_))
        ));
        assert_eq!(mix.timeline(), before);
        assert_eq!(mix.track_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_non_positive_master_tempo_keeps_master_grid() {
        let mix = Mix::new(format());
        mix.load(MixSpec {
            tracks: vec![("a".to_string(), spec(tone(0.5, 3.0), 0, Some(vec![0.0, 0.5, 1.0, 1.5])))],
            tempo: Some(rows(&["0 a -100%"])),
        });

        let timeline = mix.timeline();
        assert_eq!(timeline.grid.times(), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(timeline.num_segments, 3);
        assert_eq!(mix.segment(0).expect("segment").len(), 4000);
    }

    #[test]
    fn test_unknown_track_beats() {
        let mix = two_track_mix();
        assert!(matches!(
            mix.receive_beats("ghost", &[0.0, 1.0]),
            Err(MixError::UnknownTrack(_))
        ));
    }

    #[test]
    fn test_missing_tempo_follows_earliest_track() {
        let mix = Mix::new(format());
        mix.load(MixSpec {
            tracks: vec![
                ("late".to_string(), spec(tone(0.5, 3.0), 1, Some(vec![0.0, 1.0, 2.0]))),
                ("early".to_string(), spec(tone(0.5, 3.0), 0, Some(vec![0.0, 0.5, 1.0]))),
            ],
            tempo: None,
        });
        let timeline = mix.timeline();
        // early's beats, then its mean beat length past its own span
        assert_eq!(timeline.grid.times(), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(timeline.num_segments, 3);
    }

    #[test]
    fn test_render_writes_every_segment() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("mix.wav");

        let mix = two_track_mix();
        let frames = mix.render(&path).expect("render");
        assert_eq!(frames, 20000);

        let reader = hound::WavReader::open(&path).expect("open");
        assert_eq!(reader.spec().sample_rate, RATE);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 20000);
    }

    #[test]
    fn test_lock_is_reentrant() {
        let mix = two_track_mix();
        let _outer = mix.lock();
        let _inner = mix.lock();
        assert_eq!(mix.segment(0).expect("segment").len(), 4000);
    }
}
