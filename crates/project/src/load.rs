use crate::{MixDescription, ProjectError};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

fn load_description_data(path: &Path) -> Result<MixDescription, ProjectError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    // Try JSON first, fall back to MessagePack
    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(ProjectError::from)
    })
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Load a mix description, resolving every relative path against the
/// directory the description lives in.
pub fn load_mix_description(path: &Path) -> Result<MixDescription, ProjectError> {
    let mut description = load_description_data(path)?;
    let root = path.parent().unwrap_or_else(|| Path::new("."));

    if let Some(automation) = description.automation.as_mut() {
        *automation = resolve(root, automation);
    }
    for track in description.tracks.values_mut() {
        track.audio = resolve(root, &track.audio);
        if let Some(beats) = track.beats.as_mut() {
            *beats = resolve(root, beats);
        }
        if let Some(automation) = track.automation.as_mut() {
            *automation = resolve(root, automation);
        }
    }

    log::info!(
        "loaded mix description {} with {} tracks",
        path.display(),
        description.tracks.len()
    );
    Ok(description)
}
