use beatmix_project::ProjectError;

#[derive(Debug, thiserror::Error)]
pub enum MixError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("unknown track '{0}'")]
    UnknownTrack(String),

    #[error("track '{0}' already has its beats")]
    AlreadyInitialized(String),

    #[error("track '{0}' has fewer than two beats")]
    NoBeats(String),

    #[error("failed to decode track '{track}': {source}")]
    Decode {
        track: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stretch segment {index}: {source}")]
    Stretch {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("render failed: {0}")]
    Render(#[source] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
