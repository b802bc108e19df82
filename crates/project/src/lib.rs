mod automation;
mod beats;
mod load;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use automation::{AutomationFile, Row};
pub use beats::{load_beats, parse_beats};
pub use load::load_mix_description;

/// A mix as authored: named tracks plus the mix-level automation file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixDescription {
    pub tracks: BTreeMap<String, TrackDescription>,
    /// File holding the `Tempo` section.
    #[serde(default)]
    pub automation: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescription {
    pub audio: PathBuf,
    /// Beat times; without one the beats are detected from the audio.
    #[serde(default)]
    pub beats: Option<PathBuf>,
    /// Gain in dB applied when the track is decoded.
    #[serde(default)]
    pub volume: Option<f64>,
    /// First global segment the track plays in.
    #[serde(default)]
    pub position: usize,
    #[serde(default)]
    pub start: Option<StartTime>,
    /// Number of beats to keep after `start`.
    #[serde(default)]
    pub length: Option<usize>,
    /// File with `Volume` and `Equalizer` sections.
    #[serde(default)]
    pub automation: Option<PathBuf>,
}

/// Where a track starts inside its source, snapped to a beat later on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartTime {
    Seconds(f64),
    /// `m:ss.fff` or seconds as text.
    Clock(String),
}

impl StartTime {
    pub fn seconds(&self) -> Option<f64> {
        match self {
            Self::Seconds(seconds) => Some(*seconds),
            Self::Clock(text) => beatmix_transport::parse_clock(text),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("{path}:{line}: invalid beat time '{text}'")]
    InvalidBeat {
        path: PathBuf,
        line: usize,
        text: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_description() -> MixDescription {
        let mut tracks = BTreeMap::new();
        tracks.insert(
            "intro".to_string(),
            TrackDescription {
                audio: PathBuf::from("audio/intro.wav"),
                beats: Some(PathBuf::from("audio/intro.beats")),
                volume: Some(-3.0),
                position: 0,
                start: Some(StartTime::Clock("0:12.500".to_string())),
                length: Some(64),
                automation: None,
            },
        );
        MixDescription {
            tracks,
            automation: Some(PathBuf::from("mix.txt")),
        }
    }

    #[test]
    fn test_description_msgpack_roundtrip() {
        let description = sample_description();

        let bytes = rmp_serde::encode::to_vec_named(&description).expect("serialize");
        let decoded: MixDescription = rmp_serde::decode::from_slice(&bytes).expect("deserialize");

        assert_eq!(decoded, description);
    }

    #[test]
    fn test_track_defaults() {
        let track: TrackDescription =
            serde_json::from_str(r#"{"audio": "a.wav"}"#).expect("deserialize");

        assert_eq!(track.audio, PathBuf::from("a.wav"));
        assert_eq!(track.position, 0);
        assert!(track.beats.is_none());
        assert!(track.volume.is_none());
        assert!(track.start.is_none());
        assert!(track.length.is_none());
    }

    #[test]
    fn test_start_time_forms() {
        let numeric: StartTime = serde_json::from_str("42.5").expect("number");
        let clock: StartTime = serde_json::from_str(r#""1:02.5""#).expect("string");
        let bad: StartTime = serde_json::from_str(r#""soon""#).expect("string");

        assert_eq!(numeric.seconds(), Some(42.5));
        assert_eq!(clock.seconds(), Some(62.5));
        assert_eq!(bad.seconds(), None);
    }
}
