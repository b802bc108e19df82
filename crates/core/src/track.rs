use std::fmt;
use std::path::PathBuf;

use beatmix_decode::{TargetFormat, Window};
use beatmix_project::{AutomationFile, ProjectError, StartTime, TrackDescription, load_beats};
use beatmix_transport::AudioArc;

use crate::automation::{Automation, Equalizer, Timeline, Volume};
use crate::config::MixSettings;
use crate::error::MixError;
use crate::grid::BeatGrid;

/// Where a track's audio comes from.
#[derive(Debug, Clone)]
pub enum TrackSource {
    File(PathBuf),
    Memory(AudioArc),
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory(audio) => write!(f, "<memory, {:.1} s>", audio.duration_secs()),
        }
    }
}

/// Everything needed to build a track once its beats are known.
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub source: TrackSource,
    /// First global segment the track plays in.
    pub position: usize,
    pub start: Option<StartTime>,
    /// Beats to keep after the start beat.
    pub length: Option<usize>,
    pub volume_db: f64,
    /// `Volume` and `Equalizer` sections.
    pub automation: AutomationFile,
    /// Known beat times in seconds of the source; `None` until detected.
    pub beats: Option<Vec<f64>>,
}

impl TrackSpec {
    pub fn new(source: TrackSource, position: usize) -> Self {
        Self {
            source,
            position,
            start: None,
            length: None,
            volume_db: 0.0,
            automation: AutomationFile::default(),
            beats: None,
        }
    }

    /// Read the beats and automation files a description points to.
    pub fn from_description(description: &TrackDescription) -> Result<Self, ProjectError> {
        let beats = description.beats.as_deref().map(load_beats).transpose()?;
        let automation = description
            .automation
            .as_deref()
            .map(AutomationFile::load)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            source: TrackSource::File(description.audio.clone()),
            position: description.position,
            start: description.start.clone(),
            length: description.length,
            volume_db: description.volume.unwrap_or(0.0),
            automation,
            beats,
        })
    }
}

#[derive(Debug)]
struct Loaded {
    grid: BeatGrid,
    audio: AudioArc,
}

/// One source placed on the mix's segment timeline.
///
/// A track starts uninitialized and is initialized once, when its beats are
/// known. From then on its audio is final and shared read-only.
#[derive(Debug)]
pub struct Track {
    name: String,
    spec: TrackSpec,
    loaded: Option<Loaded>,
}

impl Track {
    pub fn new(name: impl Into<String>, spec: TrackSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            loaded: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    pub fn position(&self) -> usize {
        self.spec.position
    }

    pub fn initialized(&self) -> bool {
        self.loaded.is_some()
    }

    /// Local grid, starting at zero.
    pub fn grid(&self) -> Option<&BeatGrid> {
        self.loaded.as_ref().map(|loaded| &loaded.grid)
    }

    pub fn audio(&self) -> Option<&AudioArc> {
        self.loaded.as_ref().map(|loaded| &loaded.audio)
    }

    pub fn num_segments(&self) -> usize {
        self.grid().map_or(0, BeatGrid::num_segments)
    }

    pub fn bpm(&self) -> Option<f64> {
        self.grid()?.bpm()
    }

    pub fn to_local(&self, index: usize) -> Option<usize> {
        index.checked_sub(self.spec.position)
    }

    pub fn to_global(&self, index: usize) -> usize {
        index + self.spec.position
    }

    /// Whether global segments `[start, stop)` all lie inside the track.
    pub fn available(&self, start: usize, stop: usize) -> bool {
        self.initialized()
            && start >= self.spec.position
            && stop - self.spec.position <= self.num_segments()
    }

    /// Audio of global segment `index`.
    pub fn segment(&self, index: usize) -> Option<&[f32]> {
        if !self.available(index, index + 1) {
            return None;
        }
        let loaded = self.loaded.as_ref()?;
        let local = self.to_local(index)?;
        Some(loaded.audio.frame_range(
            loaded.grid.sample_offset(local),
            loaded.grid.sample_offset(local + 1),
        ))
    }

    /// Decode, window and automate the audio around `beats`.
    ///
    /// `beats` are seconds of the source. The kept span runs from the start
    /// beat to `length` beats after it.
    pub fn init(&mut self, beats: &[f64], format: &MixSettings) -> Result<(), MixError> {
        let start = match self.spec.start.as_ref() {
            None => 0,
            Some(start) => match start.seconds() {
                Some(seconds) => snap_to_beat(beats, seconds),
                None => {
                    log::warn!(
                        "track '{}': unreadable start {start:?}, using the first beat",
                        self.name
                    );
                    0
                }
            },
        };
        let stop = self
            .spec
            .length
            .map_or(beats.len(), |length| (start + length + 1).min(beats.len()));
        let times = beats.get(start..stop).unwrap_or(&[]);
        if times.len() < 2 {
            return Err(MixError::NoBeats(self.name.clone()));
        }

        let window = Window {
            start: times[0],
            stop: Some(times[times.len() - 1]),
        };
        let target = TargetFormat {
            sample_rate: format.sample_rate,
            channels: format.channels,
        };
        let audio = match &self.spec.source {
            TrackSource::File(path) => {
                beatmix_decode::load_window(path, window, target, self.spec.volume_db)
            }
            TrackSource::Memory(audio) => beatmix_decode::prepare(
                &audio.to_audio_buffer(),
                window,
                target,
                self.spec.volume_db,
            ),
        }
        .map_err(|source| MixError::Decode {
            track: self.name.clone(),
            source,
        })?;

        let grid = BeatGrid::relative(times, format.sample_rate);
        let automation = &self.spec.automation;
        let audio = if automation.contains("Volume") {
            Volume::new(&grid, &audio).apply(automation.section("Volume"))
        } else {
            audio
        };
        let audio = if automation.contains("Equalizer") {
            Equalizer::new(&grid, &audio).apply(automation.section("Equalizer"))
        } else {
            audio
        };

        log::info!(
            "track '{}' ready: {} segments at {:.2} bpm from {}",
            self.name,
            grid.num_segments(),
            grid.bpm().unwrap_or(0.0),
            self.spec.source
        );
        self.loaded = Some(Loaded { grid, audio });
        Ok(())
    }
}

impl Timeline for Track {
    fn num_segments(&self) -> usize {
        Track::num_segments(self)
    }

    fn num_samples(&self, start: usize, stop: usize) -> usize {
        self.grid().map_or(0, |grid| grid.num_samples(start, stop))
    }
}

/// Index of the beat closest to `seconds`; ties go to the earlier beat.
pub(crate) fn snap_to_beat(beats: &[f64], seconds: f64) -> usize {
    let mut index = beats.partition_point(|beat| *beat <= seconds);
    if index > 0 {
        let midpoint = match beats.get(index) {
            Some(next) => (beats[index - 1] + next) / 2.0,
            None => beats[index - 1],
        };
        if seconds <= midpoint {
            index -= 1;
        }
    }
    index.min(beats.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatmix_project::Row;
    use beatmix_transport::{BitDepth, StretchMode, db_to_ratio};

    fn format() -> MixSettings {
        MixSettings {
            sample_rate: 1000,
            channels: 1,
            bit_depth: BitDepth::Sixteen,
            stretch: StretchMode::Resample,
        }
    }

    /// Audio whose samples count frames, so windows can be checked exactly.
    fn ramp(frames: usize) -> AudioArc {
        AudioArc::new((0..frames).map(|i| i as f32 / 10_000.0).collect(), 1000, 1)
    }

    fn row(line: &str) -> Row {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_snap_to_beat() {
        let beats = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(snap_to_beat(&beats, 1.4), 1);
        assert_eq!(snap_to_beat(&beats, 1.5), 1);
        assert_eq!(snap_to_beat(&beats, 1.6), 2);
        assert_eq!(snap_to_beat(&beats, -1.0), 0);
        assert_eq!(snap_to_beat(&beats, 3.0), 3);
        assert_eq!(snap_to_beat(&beats, 9.0), 3);
    }

    #[test]
    fn test_uninitialized_track() {
        let track = Track::new("a", TrackSpec::new(TrackSource::Memory(ramp(100)), 2));
        assert!(!track.initialized());
        assert_eq!(track.num_segments(), 0);
        assert!(!track.available(2, 3));
        assert!(track.segment(2).is_none());
    }

    #[test]
    fn test_init_windows_audio_between_beats() {
        let mut spec = TrackSpec::new(TrackSource::Memory(ramp(5000)), 3);
        spec.start = Some(StartTime::Clock("0:01.4".to_string()));
        spec.length = Some(2);
        let mut track = Track::new("a", spec);
        track
            .init(&[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0], &format())
            .expect("init");

        // 1.4 s snaps to the beat at 1.5 s; two beats keep 1.5..2.5
        assert_eq!(track.grid().expect("grid").times(), &[0.0, 0.5, 1.0]);
        assert_eq!(track.audio().expect("audio").frames(), 1000);
        assert_eq!(track.num_segments(), 2);
        assert_eq!(track.to_local(4), Some(1));
        assert_eq!(track.to_global(1), 4);

        assert!(track.available(3, 5));
        assert!(!track.available(2, 4));
        assert!(!track.available(4, 6));

        let segment = track.segment(4).expect("segment");
        assert_eq!(segment.len(), 500);
        assert!((segment[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_init_applies_volume_automation() {
        let mut spec = TrackSpec::new(TrackSource::Memory(AudioArc::new(vec![0.5; 2000], 1000, 1)), 0);
        spec.automation.insert("Volume", vec![row("0 -6")]);
        let mut track = Track::new("a", spec);
        track.init(&[0.0, 1.0, 2.0], &format()).expect("init");

        let expected = 0.5 * db_to_ratio(-6.0) as f32;
        let audio = track.audio().expect("audio");
        assert!(audio.samples().iter().all(|s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_init_applies_gain() {
        let mut spec = TrackSpec::new(TrackSource::Memory(AudioArc::new(vec![0.5; 2000], 1000, 1)), 0);
        spec.volume_db = -20.0;
        let mut track = Track::new("a", spec);
        track.init(&[0.0, 1.0, 2.0], &format()).expect("init");
        assert!((track.audio().expect("audio").samples()[0] - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_init_without_beats_fails() {
        let mut track = Track::new("a", TrackSpec::new(TrackSource::Memory(ramp(100)), 0));
        assert!(matches!(track.init(&[], &format()), Err(MixError::NoBeats(_))));
        assert!(matches!(track.init(&[0.05], &format()), Err(MixError::NoBeats(_))));
        assert!(!track.initialized());
    }

    #[test]
    fn test_init_missing_file_is_decode_error() {
        let source = TrackSource::File(PathBuf::from("/definitely/not/here.wav"));
        let mut track = Track::new("gone", TrackSpec::new(source, 0));
        let err = track.init(&[0.0, 1.0], &format()).unwrap_err();
        assert!(matches!(err, MixError::Decode { ref track, .. } if track == "gone"));
    }
}
