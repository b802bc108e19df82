use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::Context;
use beatmix_core::{
    FixedTempoDetector, MixSpec, PlayerEvent, Session, SessionEvent, Settings, format_clock,
    parse_clock, render_offline,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "beatmix", version)]
#[command(about = "Beat-synchronized mixing of whole DJ sets")]
struct Args {
    /// Settings file instead of the one in the user config directory
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a mix description to a WAV file
    Render { mix: PathBuf, out: PathBuf },
    /// Play a mix description, reading transport commands from stdin
    Play { mix: PathBuf },
}

/// One line typed during playback.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    TogglePlay,
    Stop,
    NextTrack,
    PreviousTrack,
    /// Seconds into the mix.
    Jump(f64),
    Render(PathBuf),
    Quit,
}

const HELP: &str = "p: play/pause  s: stop  n: next track  b: previous track  \
                    j TIME: jump  r PATH: render  q: quit";

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match (command, argument) {
        ("p", "") => Some(Input::TogglePlay),
        ("s", "") => Some(Input::Stop),
        ("n", "") => Some(Input::NextTrack),
        ("b", "") => Some(Input::PreviousTrack),
        ("q", "") => Some(Input::Quit),
        ("j", time) => parse_clock(time).map(Input::Jump),
        ("r", path) if !path.is_empty() => Some(Input::Render(PathBuf::from(path))),
        _ => None,
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load()?,
    };

    match args.command {
        Command::Render { mix, out } => render(&settings, &mix, &out),
        Command::Play { mix } => play(&settings, &mix),
    }
}

fn render(settings: &Settings, mix: &Path, out: &Path) -> anyhow::Result<()> {
    let spec = MixSpec::load(mix).with_context(|| format!("failed to load {}", mix.display()))?;
    let mut detector = FixedTempoDetector::new(settings.beats.fallback_bpm);
    let frames = render_offline(settings, spec, &mut detector, out)?;

    log::info!(
        "wrote {} of audio to {}",
        format_clock(frames as f64 / settings.mix.sample_rate as f64),
        out.display()
    );
    Ok(())
}

fn play(settings: &Settings, mix: &Path) -> anyhow::Result<()> {
    let session = Session::from_settings(settings)?;
    session
        .load_file(mix)
        .with_context(|| format!("failed to load {}", mix.display()))?;

    let sample_rate = settings.mix.sample_rate as f64;
    let events = session.events().clone();
    let printer = thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    SessionEvent::Player(PlayerEvent::Position(frames)) => {
                        log::debug!("at {}", format_clock(frames as f64 / sample_rate));
                    }
                    SessionEvent::Player(PlayerEvent::State { playing }) => {
                        log::info!("{}", if playing { "playing" } else { "paused" });
                    }
                    SessionEvent::Loaded { segments } => {
                        log::info!("mix loaded, {segments} segments ready");
                    }
                    SessionEvent::Updated { segments } => {
                        log::info!("{segments} segments ready");
                    }
                    SessionEvent::Rendered { path, frames } => log::info!(
                        "rendered {} to {}",
                        format_clock(frames as f64 / sample_rate),
                        path.display()
                    ),
                    SessionEvent::Error(message) => log::error!("{message}"),
                }
            }
        })?;

    println!("{HELP}");
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_input(&line) {
            Some(Input::TogglePlay) => session.toggle_play(),
            Some(Input::Stop) => session.stop(),
            Some(Input::NextTrack) => session.next_track(),
            Some(Input::PreviousTrack) => session.previous_track(),
            Some(Input::Jump(seconds)) => session.jump(seconds),
            Some(Input::Render(path)) => session.render(path),
            Some(Input::Quit) => break,
            None => println!("unknown command '{}'\n{HELP}", line.trim()),
        }
    }

    drop(session);
    if printer.join().is_err() {
        log::error!("event printer panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_commands() {
        assert_eq!(parse_input("p"), Some(Input::TogglePlay));
        assert_eq!(parse_input(" s "), Some(Input::Stop));
        assert_eq!(parse_input("n"), Some(Input::NextTrack));
        assert_eq!(parse_input("b"), Some(Input::PreviousTrack));
        assert_eq!(parse_input("q"), Some(Input::Quit));
    }

    #[test]
    fn test_parse_jump() {
        assert_eq!(parse_input("j 90"), Some(Input::Jump(90.0)));
        assert_eq!(parse_input("j 1:30.5"), Some(Input::Jump(90.5)));
        assert_eq!(parse_input("j"), None);
        assert_eq!(parse_input("j soon"), None);
    }

    #[test]
    fn test_parse_render() {
        assert_eq!(
            parse_input("r out/my mix.wav"),
            Some(Input::Render(PathBuf::from("out/my mix.wav")))
        );
        assert_eq!(parse_input("r"), None);
    }

    #[test]
    fn test_unknown_input() {
        assert_eq!(parse_input("play"), None);
        assert_eq!(parse_input("p now"), None);
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["beatmix", "--config", "c.toml", "render", "mix.json", "out.wav"]);
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(args.command, Command::Render { .. }));
    }
}
