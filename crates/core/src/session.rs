use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use beatmix_engine::{AudioSink, CpalSink, NullSink, OutputSpec};
use beatmix_transport::PcmBuffer;
use crossbeam_channel::{Receiver, Sender};

use crate::beats::{BeatDetector, BeatResult, BeatWorker, FixedTempoDetector};
use crate::config::{OutputDevice, Settings};
use crate::error::MixError;
use crate::mix::{Mix, MixSpec};
use crate::player::{PlaybackLink, Player, PlayerConfig, PlayerEvent, SegmentReply, SegmentRequest};

/// Builds the sink on the output thread, for sinks that cannot move between threads.
pub type SinkFactory = Box<dyn FnOnce() -> Box<dyn AudioSink> + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Loaded { segments: usize },
    /// The grid changed after beats arrived.
    Updated { segments: usize },
    Player(PlayerEvent),
    Rendered { path: PathBuf, frames: u64 },
    Error(String),
}

enum MixCommand {
    Load(MixSpec),
    Segment(SegmentRequest),
    Render(PathBuf),
    Shutdown,
}

enum OutputCommand {
    Write(PcmBuffer),
    Pause,
    Shutdown,
}

/// Routes the player's traffic onto the worker threads.
struct ChannelLink {
    mix: Sender<MixCommand>,
    output: Sender<OutputCommand>,
    events: Sender<SessionEvent>,
}

impl PlaybackLink for ChannelLink {
    fn request_segment(&self, request: SegmentRequest) {
        let _ = self.mix.send(MixCommand::Segment(request));
    }

    fn deliver(&self, chunk: PcmBuffer) {
        let _ = self.output.send(OutputCommand::Write(chunk));
    }

    fn notify(&self, event: PlayerEvent) {
        if event == (PlayerEvent::State { playing: false }) {
            let _ = self.output.send(OutputCommand::Pause);
        }
        let _ = self.events.send(SessionEvent::Player(event));
    }
}

/// A running mix with playback: the mix, beat and output threads wired
/// together once. Dropping the session stops and joins them.
pub struct Session {
    mix: Arc<Mix>,
    player: Arc<Player>,
    mix_tx: Sender<MixCommand>,
    output_tx: Sender<OutputCommand>,
    events: Receiver<SessionEvent>,
    mix_thread: Option<JoinHandle<()>>,
    output_thread: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        settings: &Settings,
        detector: Box<dyn BeatDetector>,
        sink: SinkFactory,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        let (mix_tx, mix_rx) = crossbeam_channel::unbounded();
        let (output_tx, output_rx) = crossbeam_channel::unbounded();
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (results_tx, results_rx) = crossbeam_channel::unbounded();

        let mix = Arc::new(Mix::new(settings.mix.clone()));
        let link = Arc::new(ChannelLink {
            mix: mix_tx.clone(),
            output: output_tx.clone(),
            events: events_tx.clone(),
        });
        let player = Arc::new(Player::new(PlayerConfig::from_settings(settings), link));
        let beats = BeatWorker::spawn(detector, results_tx)?;

        let mix_thread = {
            let worker = MixWorker {
                mix: mix.clone(),
                player: player.clone(),
                beats,
                events: events_tx.clone(),
            };
            thread::Builder::new()
                .name("mix-worker".to_string())
                .spawn(move || worker.run(mix_rx, results_rx))?
        };

        let output_thread = {
            let spec = OutputSpec {
                sample_rate: settings.mix.sample_rate,
                channels: settings.mix.channels,
                bit_depth: settings.mix.bit_depth,
            };
            let player = player.clone();
            thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || run_output(sink, spec, output_rx, player, events_tx))?
        };

        Ok(Self {
            mix,
            player,
            mix_tx,
            output_tx,
            events,
            mix_thread: Some(mix_thread),
            output_thread: Some(output_thread),
        })
    }

    /// Session with the configured output device and the fixed-tempo detector.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let detector = Box::new(FixedTempoDetector::new(settings.beats.fallback_bpm));
        let sink: SinkFactory = match settings.output.device {
            OutputDevice::Default => Box::new(|| Box::new(CpalSink::new()) as Box<dyn AudioSink>),
            OutputDevice::Null => Box::new(|| Box::new(NullSink::new()) as Box<dyn AudioSink>),
        };
        Self::new(settings, detector, sink)
    }

    pub fn mix(&self) -> &Mix {
        &self.mix
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn load(&self, spec: MixSpec) {
        let _ = self.mix_tx.send(MixCommand::Load(spec));
    }

    pub fn load_file(&self, path: &Path) -> Result<(), MixError> {
        self.load(MixSpec::load(path)?);
        Ok(())
    }

    pub fn toggle_play(&self) {
        self.player.toggle_play();
    }

    pub fn stop(&self) {
        self.player.stop();
    }

    pub fn jump(&self, seconds: f64) {
        let sample_rate = self.mix.format().sample_rate as f64;
        self.player.jump((seconds.max(0.0) * sample_rate).round() as usize);
    }

    pub fn next_track(&self) {
        self.player.next_track();
    }

    pub fn previous_track(&self) {
        self.player.previous_track();
    }

    /// Render on the mix thread; completion arrives as [`SessionEvent::Rendered`].
    pub fn render(&self, path: PathBuf) {
        let _ = self.mix_tx.send(MixCommand::Render(path));
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// Drain pending events.
    pub fn poll(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.mix_tx.send(MixCommand::Shutdown);
        let _ = self.output_tx.send(OutputCommand::Shutdown);
        for handle in [self.mix_thread.take(), self.output_thread.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{name} thread panicked");
            }
        }
    }
}

struct MixWorker {
    mix: Arc<Mix>,
    player: Arc<Player>,
    beats: BeatWorker,
    events: Sender<SessionEvent>,
}

impl MixWorker {
    fn run(self, commands: Receiver<MixCommand>, results: Receiver<BeatResult>) {
        log::info!("mix worker started");
        loop {
            crossbeam_channel::select! {
                recv(commands) -> command => match command {
                    Ok(MixCommand::Load(spec)) => self.load(spec),
                    Ok(MixCommand::Segment(request)) => self.segment(request),
                    Ok(MixCommand::Render(path)) => self.render(path),
                    Ok(MixCommand::Shutdown) | Err(_) => break,
                },
                recv(results) -> result => match result {
                    Ok(result) => self.beats(result),
                    Err(_) => break,
                },
            }
        }
        log::info!("mix worker shutting down");
    }

    fn load(&self, spec: MixSpec) {
        {
            // jobs are queued before any reply can be handled
            let _lock = self.mix.lock();
            let jobs = self.mix.load(spec);
            self.beats.submit(jobs);
        }
        let timeline = self.mix.timeline();
        self.player.loaded(timeline.clone());
        let _ = self.events.send(SessionEvent::Loaded {
            segments: timeline.num_segments,
        });
    }

    fn beats(&self, result: BeatResult) {
        let outcome = match result.beats {
            Ok(beats) => self.mix.receive_beats(&result.track, &beats),
            Err(err) => {
                log::error!("no beats for '{}': {err:#}", result.track);
                self.mix.drop_track(&result.track)
            }
        };
        if let Err(err) = outcome {
            let _ = self.events.send(SessionEvent::Error(err.to_string()));
        }

        let timeline = self.mix.timeline();
        self.player.timeline_updated(timeline.clone());
        let _ = self.events.send(SessionEvent::Updated {
            segments: timeline.num_segments,
        });
    }

    fn segment(&self, request: SegmentRequest) {
        let pcm = match self.mix.segment(request.index) {
            Ok(pcm) => pcm,
            Err(err) => {
                log::error!("segment {} failed: {err}", request.index);
                let format = self.mix.format();
                PcmBuffer::empty(format.sample_rate, format.channels, format.bit_depth)
            }
        };
        self.player.receive(SegmentReply {
            index: request.index,
            generation: request.generation,
            pcm,
        });
    }

    fn render(&self, path: PathBuf) {
        let event = match self.mix.render(&path) {
            Ok(frames) => SessionEvent::Rendered { path, frames },
            Err(err) => {
                log::error!("render failed: {err}");
                SessionEvent::Error(err.to_string())
            }
        };
        let _ = self.events.send(event);
    }
}

fn run_output(
    make_sink: SinkFactory,
    spec: OutputSpec,
    commands: Receiver<OutputCommand>,
    player: Arc<Player>,
    events: Sender<SessionEvent>,
) {
    log::info!("audio output started");

    let mut sink = make_sink();
    if let Err(err) = sink.open(spec) {
        log::error!("audio output unavailable, playing silently: {err:#}");
        let _ = events.send(SessionEvent::Error(err.to_string()));
        sink = Box::new(NullSink::new());
        if let Err(err) = sink.open(spec) {
            log::error!("null output failed to open: {err:#}");
            return;
        }
    }

    for command in commands {
        match command {
            OutputCommand::Write(pcm) => {
                if let Err(err) = sink.write(&pcm.to_bytes()) {
                    log::error!("audio write failed: {err:#}");
                }
                player.send_samples();
            }
            OutputCommand::Pause => {
                if let Err(err) = sink.pause() {
                    log::error!("audio pause failed: {err:#}");
                }
            }
            OutputCommand::Shutdown => break,
        }
    }

    log::info!("audio output shutting down");
}

/// Render a mix without playback, detecting missing beats inline.
pub fn render_offline(
    settings: &Settings,
    spec: MixSpec,
    detector: &mut dyn BeatDetector,
    path: &Path,
) -> Result<u64, MixError> {
    let mix = Mix::new(settings.mix.clone());
    for job in mix.load(spec) {
        let result = job.run(detector);
        match result.beats {
            Ok(beats) => {
                if let Err(err) = mix.receive_beats(&result.track, &beats) {
                    log::error!("skipping '{}': {err}", result.track);
                }
            }
            Err(err) => {
                log::error!("no beats for '{}': {err:#}", result.track);
                mix.drop_track(&result.track)?;
            }
        }
    }
    mix.render(path)
}
