// Etude command line: list inputs, practice a score live, or replay a take

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::{select, unbounded, Receiver};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use etude_lib::config::{default_config_path, Config};
use etude_lib::devices::enumerate_midi_devices;
use etude_lib::feedback::{FeedbackEvent, FeedbackUnit, SessionReport};
use etude_lib::input::{pitch_name, InputSource, MidiPortSource, SmfPerformanceSource};
use etude_lib::matching::MatchVerdict;
use etude_lib::score::load_score;
use etude_lib::session::{PracticeSession, RunnerOptions, SessionRunner, SessionStatus};

const USAGE: &str = "\
Usage:
  etude devices
  etude practice <score.mid> [--port <name>] [OPTIONS]
  etude replay <score.mid> <performance.mid> [OPTIONS]

Options:
  --config <path>    Config file (default: platform config dir)
  --report <dir>     Write the session report as JSON into <dir>
  --verbose          Extra debug output

While practicing, type p + Enter to pause, r to resume, q to stop.";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let verbose = args.iter().any(|a| a == "--verbose");
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Positional arguments after the command, skipping flags and their values
fn positionals(args: &[String]) -> Vec<&str> {
    let mut result = Vec::new();
    let mut iter = args.iter().skip(2);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" => {}
            "--config" | "--report" | "--port" => {
                iter.next();
            }
            other => result.push(other),
        }
    }
    result
}

fn run(args: &[String]) -> anyhow::Result<()> {
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config_path = option_value(args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = if option_value(args, "--config").is_some() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?
    } else {
        Config::load_or_default(&config_path)
    };
    let report_dir = option_value(args, "--report")
        .map(PathBuf::from)
        .or_else(|| config.report_dir.clone());

    match command.as_str() {
        "devices" => list_devices(),
        "practice" => {
            let positional = positionals(args);
            let score_path = positional
                .first()
                .ok_or_else(|| anyhow!("practice needs a score file\n\n{}", USAGE))?;
            let port = option_value(args, "--port").or(config.input_port.as_deref());
            let source = MidiPortSource::find(port)?;
            println!("Input: {}", source.device().name);
            practice(&config, Path::new(score_path), Box::new(source), report_dir.as_deref(), true)
        }
        "replay" => {
            let positional = positionals(args);
            let (Some(score_path), Some(take_path)) = (positional.first(), positional.get(1)) else {
                bail!("replay needs a score file and a performance file\n\n{}", USAGE);
            };
            let source = SmfPerformanceSource::load(Path::new(take_path))
                .with_context(|| format!("Failed to load performance {}", take_path))?;
            println!("Replaying {} messages from {}", source.len(), take_path);
            practice(&config, Path::new(score_path), Box::new(source), report_dir.as_deref(), false)
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let devices = enumerate_midi_devices();
    if devices.is_empty() {
        println!("No MIDI input ports found.");
        return Ok(());
    }
    println!("MIDI inputs ({}):", devices.len());
    for device in devices {
        println!("  [{}] {}", device.id, device.name);
    }
    Ok(())
}

enum Command {
    Pause,
    Resume,
    Stop,
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "p" | "pause" => Command::Pause,
                "r" | "resume" => Command::Resume,
                "q" | "quit" | "stop" => Command::Stop,
                _ => continue,
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

fn practice(
    config: &Config,
    score_path: &Path,
    source: Box<dyn InputSource>,
    report_dir: Option<&Path>,
    interactive: bool,
) -> anyhow::Result<()> {
    let score = load_score(score_path, config.score_channel)
        .with_context(|| format!("Failed to load score {}", score_path.display()))?;

    let mut session = PracticeSession::from_config(config)?;
    session.load(&score)?;
    let feedback = session.subscribe();

    println!(
        "Practicing {} ({} notes)",
        score.title.as_deref().unwrap_or("untitled"),
        score.len()
    );

    let runner = SessionRunner::start(session, source, RunnerOptions::from_config(config))?;
    let commands = if interactive {
        spawn_stdin_reader()
    } else {
        crossbeam_channel::never()
    };

    loop {
        select! {
            recv(feedback) -> event => match event {
                Ok(FeedbackEvent::Feedback(unit)) => print_feedback(&unit),
                Ok(FeedbackEvent::Status(SessionStatus::Paused)) => {
                    println!("-- paused (r + Enter to resume)");
                }
                Ok(FeedbackEvent::Status(status)) => log::debug!("Session status: {:?}", status),
                Ok(FeedbackEvent::Finished(_)) | Err(_) => break,
            },
            recv(commands) -> command => match command {
                Ok(Command::Pause) => {
                    if let Err(e) = runner.pause() {
                        println!("-- cannot pause: {}", e);
                    }
                }
                Ok(Command::Resume) => {
                    if let Err(e) = runner.resume() {
                        println!("-- cannot resume: {}", e);
                    }
                }
                // EOF on stdin ends the session too
                Ok(Command::Stop) | Err(_) => break,
            },
        }
    }

    let report = runner.stop()?;
    print_report(&report);

    if let Some(dir) = report_dir {
        let path = report.save(dir)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_feedback(unit: &FeedbackUnit) {
    let line = match &unit.verdict {
        MatchVerdict::Hit {
            pitch,
            timing_delta_us,
            ..
        } => format!(
            "hit   {:<4} {:+6.0} ms {}",
            pitch_name(*pitch),
            *timing_delta_us as f64 / 1000.0,
            unit.timing.map(|t| t.label()).unwrap_or("")
        ),
        MatchVerdict::Miss { pitch, .. } => format!("miss  {:<4}", pitch_name(*pitch)),
        MatchVerdict::Extra { event, .. } => format!("extra {:<4}", pitch_name(event.pitch)),
    };
    println!(
        "{:<28} accuracy {:5.1}%  streak {}",
        line,
        unit.running_accuracy * 100.0,
        unit.streak
    );
}

fn print_report(report: &SessionReport) {
    println!();
    println!("=== {} ===", report.title.as_deref().unwrap_or("Session"));
    println!(
        "  {} / {} notes hit, {} missed, {} extra",
        report.hits, report.total_notes, report.misses, report.extras
    );
    println!("  Accuracy: {:.1}%", report.accuracy * 100.0);
    println!(
        "  Timing: mean {:+.1} ms, mean absolute {:.1} ms ({} early, {} on time, {} late)",
        report.mean_timing_delta_ms,
        report.mean_abs_timing_delta_ms,
        report.early_hits,
        report.on_time_hits,
        report.late_hits
    );
    println!("  Best streak: {}", report.best_streak);
    for message in &report.feedback {
        println!("  - {}", message);
    }
}
