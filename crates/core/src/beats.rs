//! Beat detection off the mix lock.
//!
//! The mix hands out [`BeatJob`]s for tracks without beats; a worker thread
//! runs them through a [`BeatDetector`] and posts [`BeatResult`]s back.

use std::thread::{self, JoinHandle};

use beatmix_transport::{AudioArc, bpm_to_time};
use crossbeam_channel::{Receiver, Sender};

use crate::track::TrackSource;

/// Maps raw audio to beat times in seconds.
pub trait BeatDetector: Send {
    fn detect(&mut self, audio: &AudioArc) -> anyhow::Result<Vec<f64>>;
}

/// Uniform grid from the first sample at a fixed tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedTempoDetector {
    bpm: f64,
}

impl FixedTempoDetector {
    pub fn new(bpm: f64) -> Self {
        Self { bpm }
    }
}

impl BeatDetector for FixedTempoDetector {
    fn detect(&mut self, audio: &AudioArc) -> anyhow::Result<Vec<f64>> {
        if !(self.bpm > 0.0) {
            anyhow::bail!("invalid tempo {} bpm", self.bpm);
        }
        let step = bpm_to_time(self.bpm);
        let duration = audio.duration_secs();
        let count = (duration / step + 1e-9).floor() as usize + 1;
        Ok((0..count).map(|i| i as f64 * step).collect())
    }
}

#[derive(Debug, Clone)]
pub struct BeatJob {
    pub track: String,
    pub position: usize,
    pub source: TrackSource,
}

impl BeatJob {
    pub fn run(&self, detector: &mut dyn BeatDetector) -> BeatResult {
        let beats = self.audio().and_then(|audio| detector.detect(&audio));
        BeatResult {
            track: self.track.clone(),
            beats,
        }
    }

    fn audio(&self) -> anyhow::Result<AudioArc> {
        match &self.source {
            TrackSource::File(path) => Ok(beatmix_decode::decode_file(path)?.freeze()),
            TrackSource::Memory(audio) => Ok(audio.clone()),
        }
    }
}

#[derive(Debug)]
pub struct BeatResult {
    pub track: String,
    pub beats: anyhow::Result<Vec<f64>>,
}

/// Handle to the beat detection thread. Dropping it finishes the queued jobs
/// and joins the thread.
pub struct BeatWorker {
    jobs: Option<Sender<Vec<BeatJob>>>,
    handle: Option<JoinHandle<()>>,
}

impl BeatWorker {
    pub fn spawn(
        detector: Box<dyn BeatDetector>,
        results: Sender<BeatResult>,
    ) -> anyhow::Result<Self> {
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("beat-worker".to_string())
            .spawn(move || worker_thread(detector, jobs_rx, results))?;

        Ok(Self {
            jobs: Some(jobs_tx),
            handle: Some(handle),
        })
    }

    /// Queue one load's jobs. Jobs are never cancelled.
    pub fn submit(&self, jobs: Vec<BeatJob>) {
        if jobs.is_empty() {
            return;
        }
        let Some(tx) = &self.jobs else {
            return;
        };
        if tx.send(jobs).is_err() {
            log::error!("beat worker is gone, jobs dropped");
        }
    }
}

impl Drop for BeatWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("beat worker panicked");
            }
        }
    }
}

fn worker_thread(
    mut detector: Box<dyn BeatDetector>,
    jobs: Receiver<Vec<BeatJob>>,
    results: Sender<BeatResult>,
) {
    log::info!("beat worker started");

    for batch in jobs {
        for job in batch {
            log::info!("detecting beats of '{}' from {}", job.track, job.source);
            let result = job.run(detector.as_mut());
            if let Err(err) = &result.beats {
                log::error!("beat detection failed for '{}': {err:#}", result.track);
            }
            if results.send(result).is_err() {
                log::info!("beat results no longer wanted");
                return;
            }
        }
    }

    log::info!("beat worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_tempo_grid() {
        let audio = AudioArc::new(vec![0.0; 2000], 1000, 1);
        let beats = FixedTempoDetector::new(120.0).detect(&audio).expect("detect");
        assert_eq!(beats, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_fixed_tempo_rejects_bad_bpm() {
        let audio = AudioArc::new(vec![0.0; 10], 1000, 1);
        assert!(FixedTempoDetector::new(0.0).detect(&audio).is_err());
    }

    #[test]
    fn test_missing_file_reports_error() {
        let job = BeatJob {
            track: "gone".to_string(),
            position: 0,
            source: TrackSource::File("/definitely/not/here.wav".into()),
        };
        let result = job.run(&mut FixedTempoDetector::new(120.0));
        assert_eq!(result.track, "gone");
        assert!(result.beats.is_err());
    }

    #[test]
    fn test_worker_posts_results_in_order() {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        let worker =
            BeatWorker::spawn(Box::new(FixedTempoDetector::new(60.0)), results_tx).expect("spawn");

        let job = |name: &str, frames: usize| BeatJob {
            track: name.to_string(),
            position: 0,
            source: TrackSource::Memory(AudioArc::new(vec![0.0; frames], 100, 1)),
        };
        worker.submit(vec![job("a", 300), job("b", 100)]);

        let first = results_rx.recv_timeout(Duration::from_secs(5)).expect("first");
        let second = results_rx.recv_timeout(Duration::from_secs(5)).expect("second");
        assert_eq!(first.track, "a");
        assert_eq!(first.beats.expect("beats"), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(second.track, "b");
        assert_eq!(second.beats.expect("beats"), vec![0.0, 1.0]);

        drop(worker);
    }
}
