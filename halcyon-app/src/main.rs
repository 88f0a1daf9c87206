//! Halcyon CLI entry point.
//!
//! Wires a `HalcyonEngine` to a line-oriented control surface on stdin
//! and forwards engine events to the terminal. All audio work happens on
//! the engine's own blocking thread; this binary only issues commands
//! and renders events.

mod commands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use halcyon_core::{
    EngineConfig, EngineStatus, HalcyonEngine, SinkHandle, WavFileSink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Command-line options. Parsed by hand; the surface is three flags.
struct CliArgs {
    alpha: f32,
    output_dir: String,
    input_device: Option<String>,
    list_devices: bool,
}

impl CliArgs {
    fn parse() -> anyhow::Result<Self> {
        let mut args = CliArgs {
            alpha: 0.9,
            output_dir: ".".into(),
            input_device: None,
            list_devices: false,
        };

        let mut iter = std::env::args().skip(1);
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "--alpha" => {
                    let value = iter.next().context("--alpha requires a value")?;
                    args.alpha = value
                        .parse()
                        .with_context(|| format!("invalid --alpha value: {value}"))?;
                }
                "--out" => {
                    args.output_dir = iter.next().context("--out requires a directory")?;
                }
                "--device" => {
                    args.input_device = Some(iter.next().context("--device requires a name")?);
                }
                "--list-devices" => args.list_devices = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other => anyhow::bail!("unknown flag: {other} (see --help)"),
            }
        }
        Ok(args)
    }
}

fn print_usage() {
    println!("halcyon — real-time noise reduction");
    println!();
    println!("usage: halcyon [--alpha <0..1>] [--out <dir>] [--device <name>] [--list-devices]");
    println!();
    commands::print_help();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse()?;

    if args.list_devices {
        commands::print_devices();
        return Ok(());
    }

    let sink = SinkHandle::new(WavFileSink::new(&args.output_dir));
    let config = EngineConfig {
        initial_alpha: args.alpha,
        ..EngineConfig::default()
    };
    let engine = Arc::new(
        HalcyonEngine::new(config, sink).context("engine configuration rejected")?,
    );

    spawn_event_forwarders(&engine);

    println!("halcyon ready (output dir: {})", args.output_dir);
    commands::print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else {
                    // stdin closed: behave like quit
                    engine.stop();
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(cmd)) => {
                        if !commands::dispatch(&engine, args.input_device.as_deref(), cmd) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(msg) => println!("{msg}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                engine.stop();
                break;
            }
        }
    }

    await_idle(&engine).await;
    // Give the event forwarders a beat to print the save notice.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

/// Forward engine events to the terminal from background tasks.
fn spawn_event_forwarders(engine: &Arc<HalcyonEngine>) {
    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            match event.detail {
                Some(detail) => println!("[{:?}] {detail}", event.status),
                None => println!("[{:?}]", event.status),
            }
        }
    });

    let mut saved_rx = engine.subscribe_saved();
    tokio::spawn(async move {
        while let Ok(event) = saved_rx.recv().await {
            match (event.path, event.warning) {
                (Some(path), _) => println!(
                    "saved {} samples to {}",
                    event.samples_written,
                    path.display()
                ),
                (None, Some(warning)) => println!("{warning}"),
                (None, None) => {}
            }
        }
    });

    // One level-meter line roughly every second at the default frame size.
    let mut activity_rx = engine.subscribe_activity();
    tokio::spawn(async move {
        while let Ok(event) = activity_rx.recv().await {
            if event.seq % 43 == 0 {
                info!(
                    seq = event.seq,
                    input_rms = format_args!("{:.4}", event.input_rms),
                    noise_estimate = format_args!("{:.6}", event.noise_estimate),
                    "level"
                );
            }
        }
    });
}

/// Wait (bounded) for the pipeline to flush and report Idle or Error, so
/// the save notice lands before the process exits.
async fn await_idle(engine: &Arc<HalcyonEngine>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while engine.status() == EngineStatus::Running {
        if tokio::time::Instant::now() >= deadline {
            eprintln!("timed out waiting for the session to flush");
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
