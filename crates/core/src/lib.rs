pub mod automation;
pub mod beats;
pub mod buffer;
pub mod config;
pub mod error;
pub mod grid;
pub mod interpolate;
pub mod mix;
pub mod player;
pub mod session;
pub mod track;

pub use automation::{Automation, Equalizer, Tempo, Timeline, Volume};
pub use beats::{BeatDetector, BeatJob, BeatResult, BeatWorker, FixedTempoDetector};
pub use buffer::{BufferStats, PlaybackBuffer};
pub use config::{JumpTo, OutputDevice, Settings};
pub use error::{ConfigError, MixError};
pub use grid::BeatGrid;
pub use interpolate::{Interpolate, Interpolation};
pub use mix::{Mix, MixLock, MixSpec, TimelineSnapshot};
pub use player::{Flow, PlaybackLink, Player, PlayerConfig, PlayerEvent, SegmentReply, SegmentRequest};
pub use session::{Session, SessionEvent, SinkFactory, render_offline};
pub use track::{Track, TrackSource, TrackSpec};

pub use beatmix_decode::decode_file;
pub use beatmix_project::{AutomationFile, MixDescription, ProjectError, load_mix_description};
pub use beatmix_render::write_wav;
pub use beatmix_transport::{
    AudioArc, AudioBuffer, BitDepth, PcmBuffer, StretchMode, format_clock, parse_clock,
};
