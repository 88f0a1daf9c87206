//! Interactive commands accepted on stdin.

use halcyon_core::audio::device::{list_devices, DeviceKind};
use halcyon_core::{EngineStatus, HalcyonEngine};
use tracing::warn;

/// One parsed control-surface command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    /// Update the smoothing factor for the next frame.
    Alpha(f32),
    Status,
    /// Retry persisting a session whose save failed.
    Save,
    Devices,
    Help,
    Quit,
}

/// Parse one input line. Returns `Err` with a user-facing message for
/// anything unrecognised; blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };

    let cmd = match head {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "alpha" => {
            let Some(value) = words.next() else {
                return Err("usage: alpha <value in [0, 1]>".into());
            };
            let value: f32 = value
                .parse()
                .map_err(|_| format!("not a number: {value}"))?;
            Command::Alpha(value)
        }
        "status" => Command::Status,
        "save" => Command::Save,
        "devices" => Command::Devices,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other} (try 'help')")),
    };

    if words.next().is_some() {
        return Err(format!("trailing input after '{head}'"));
    }
    Ok(Some(cmd))
}

/// Execute one command against the engine. Returns `false` when the loop
/// should exit.
pub fn dispatch(engine: &HalcyonEngine, preferred_input: Option<&str>, cmd: Command) -> bool {
    match cmd {
        Command::Start => match engine.start_with_device(preferred_input.map(String::from)) {
            Ok(()) => println!("session started (alpha = {})", engine.alpha()),
            Err(e) => println!("cannot start: {e}"),
        },
        Command::Stop => {
            engine.stop();
        }
        Command::Alpha(value) => match engine.set_alpha(value) {
            Ok(()) => println!("alpha set to {value}; takes effect on the next frame"),
            Err(e) => println!("rejected: {e} (previous value {} kept)", engine.alpha()),
        },
        Command::Status => {
            let snap = engine.diagnostics_snapshot();
            println!(
                "status: {:?} | alpha {} | frames {} | saturated samples {} | playback drops {}",
                engine.status(),
                engine.alpha(),
                snap.frames_processed,
                snap.samples_saturated,
                snap.playback_dropped,
            );
            if engine.has_unsaved() {
                println!("an unsaved session is parked; 'save' to retry persisting it");
            }
        }
        Command::Save => match engine.retry_save() {
            Ok(path) => println!("saved to {}", path.display()),
            Err(e) => println!("save failed: {e}"),
        },
        Command::Devices => print_devices(),
        Command::Help => print_help(),
        Command::Quit => {
            if engine.status() == EngineStatus::Running {
                warn!("quit requested while running; stopping session first");
                engine.stop();
            }
            return false;
        }
    }
    true
}

pub fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("no audio devices found");
        return;
    }
    for d in devices {
        let kind = match d.kind {
            DeviceKind::Input => "in ",
            DeviceKind::Output => "out",
        };
        let marker = if d.is_default { "*" } else { " " };
        println!("  [{kind}]{marker} {}", d.name);
    }
}

pub fn print_help() {
    println!("commands:");
    println!("  start        begin capturing, filtering and playing back");
    println!("  stop         end the session and save the processed audio");
    println!("  alpha <a>    set the noise adaptation factor, 0 <= a <= 1");
    println!("  status       engine state and pipeline counters");
    println!("  save         retry saving a session whose write failed");
    println!("  devices      list audio devices");
    println!("  quit         stop (if running) and exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse("start").unwrap(), Some(Command::Start));
        assert_eq!(parse("stop").unwrap(), Some(Command::Stop));
        assert_eq!(parse("quit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("?").unwrap(), Some(Command::Help));
    }

    #[test]
    fn parses_alpha_with_value() {
        assert_eq!(parse("alpha 0.85").unwrap(), Some(Command::Alpha(0.85)));
        // Range validation is the engine's job, not the parser's.
        assert_eq!(parse("alpha 1.5").unwrap(), Some(Command::Alpha(1.5)));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("alpha").is_err());
        assert!(parse("alpha fast").is_err());
        assert!(parse("start now").is_err());
        assert!(parse("launch").is_err());
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }
}
