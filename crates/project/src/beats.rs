use crate::ProjectError;
use beatmix_transport::parse_clock;
use std::path::{Path, PathBuf};

/// Read beat times from a text file.
///
/// Only the first column of each line is used. It holds either seconds or
/// `m:ss.fff`. Blank lines and lines starting with `#` are skipped.
pub fn load_beats(path: &Path) -> Result<Vec<f64>, ProjectError> {
    let text = std::fs::read_to_string(path)?;
    parse_beats(&text, path)
}

pub fn parse_beats(text: &str, origin: &Path) -> Result<Vec<f64>, ProjectError> {
    let mut beats = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        if first.starts_with('#') {
            continue;
        }
        let seconds = parse_clock(first).ok_or_else(|| ProjectError::InvalidBeat {
            path: PathBuf::from(origin),
            line: idx + 1,
            text: first.to_string(),
        })?;
        beats.push(seconds);
    }
    Ok(beats)
}
