use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use click_sync::audio::{AudioSink, RecordingSink, SoundLibrary};
use click_sync::clock::{HardwareClock, SystemHostClock, SystemWallClock, WallClock};
use click_sync::config::AppConfig;
use click_sync::controller::{Metronome, MetronomeHandle};
use click_sync::net::{LoopbackMesh, PeerTransport};
use click_sync::protocol::{Role, SyncCommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::runtime::{Builder, Handle};
use tracing_subscriber::filter::LevelFilter;

/// Sample identifiers offered by the built-in click generator.
const BUILTIN_SOUNDS: [&str; 6] = ["Click_hi", "Click_lo", "Glass_hi", "Glass_lo", "Wood_hi", "Wood_lo"];

#[derive(Parser, Debug)]
#[command(name = "click-sync", about = "Networked metronome with synchronized starts")]
struct Cli {
    /// Configuration file (defaults to assets/click_sync.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play locally and print every beat as JSON
    Solo {
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(long, default_value_t = 4)]
        numerator: u32,
        #[arg(long, default_value_t = 4)]
        denominator: u32,
        /// Accented beats in addition to the downbeat
        #[arg(long, value_delimiter = ',')]
        accent: Vec<u32>,
        #[arg(long, default_value = "Click")]
        sound: String,
        #[arg(long, default_value_t = 8.0)]
        seconds: f64,
    },
    /// Run a master and clients over an in-process mesh and report start offsets
    Simulate {
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(long, default_value_t = 1)]
        clients: usize,
        /// Upper bound of the random per-message link latency
        #[arg(long, default_value_t = 30)]
        latency_ms: u64,
        /// How long to keep playing after the shared start
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
    },
    /// Print a wire command
    Encode {
        #[arg(value_enum)]
        action: WireAction,
        #[arg(long, value_enum, default_value_t = WireRole::Master)]
        sender: WireRole,
        #[arg(long)]
        tempo: Option<f64>,
        /// Start instant in Unix seconds (defaults to the next whole second plus margin)
        #[arg(long)]
        at: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WireAction {
    Start,
    Stop,
    SetTempo,
    CueTempo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WireRole {
    Master,
    Client,
    None,
}

impl From<WireRole> for Role {
    fn from(role: WireRole) -> Self {
        match role {
            WireRole::Master => Role::Master,
            WireRole::Client => Role::Client,
            WireRole::None => Role::None,
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    name: String,
    clicks: usize,
    first_click_offset_ms: Option<f64>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    click_sync::init_logging(if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    });

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Solo {
            bpm,
            numerator,
            denominator,
            accent,
            sound,
            seconds,
        } => run_solo(config, bpm, numerator, denominator, &accent, &sound, seconds),
        Commands::Simulate {
            bpm,
            clients,
            latency_ms,
            seconds,
        } => run_simulate(config, bpm, clients, latency_ms, seconds),
        Commands::Encode {
            action,
            sender,
            tempo,
            at,
        } => run_encode(&config, action, sender.into(), tempo, at),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid duration {value}"))
}

struct Output {
    clock: Arc<dyn HardwareClock>,
    sink: Arc<dyn AudioSink>,
    recorder: Option<Arc<RecordingSink>>,
}

cfg_if::cfg_if! {
    if #[cfg(feature = "desktop-audio")] {
        fn open_output() -> Result<Output> {
            let device = Arc::new(click_sync::audio::CpalSink::open().context("opening audio output")?);
            Ok(Output {
                clock: device.clone(),
                sink: device,
                recorder: None,
            })
        }
    } else {
        fn open_output() -> Result<Output> {
            let clock: Arc<dyn HardwareClock> = Arc::new(SystemHostClock::default());
            let recorder = Arc::new(RecordingSink::new(clock.clone()));
            Ok(Output {
                clock,
                sink: recorder.clone(),
                recorder: Some(recorder),
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_solo(
    config: AppConfig,
    bpm: f64,
    numerator: u32,
    denominator: u32,
    accents: &[u32],
    sound: &str,
    duration_secs: f64,
) -> Result<ExitCode> {
    let duration = seconds(duration_secs)?;
    let runtime = build_runtime()?;
    let output = open_output()?;
    let wall: Arc<dyn WallClock> = Arc::new(SystemWallClock::default());

    runtime.block_on(async move {
        let (mut metronome, beats) = Metronome::new(
            config,
            output.clock,
            wall,
            output.sink,
            SoundLibrary::from_identifiers(BUILTIN_SOUNDS),
            Handle::current(),
        );
        if !metronome.select_sound(sound) {
            bail!("unknown sound '{sound}', available: {:?}", metronome.sound_names());
        }
        if !metronome.update_time_signature(Some(numerator), Some(denominator)) {
            bail!("unsupported time signature {numerator}/{denominator}");
        }
        for &beat in accents {
            metronome.toggle_accent(beat);
        }
        metronome.set_bpm(bpm);

        let (handle, task) = metronome.spawn(&Handle::current(), beats, None);
        let mut beat_stream = handle.beat_stream();
        handle.toggle_play();

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                Some(event) = beat_stream.next() => {
                    if !event.reset {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                }
            }
        }

        handle.shutdown();
        task.await.context("controller task panicked")?;
        if let Some(recorder) = output.recorder {
            eprintln!("{} clicks recorded (no audio device in this build)", recorder.triggers().len());
        }
        Ok(ExitCode::from(0))
    })
}

struct SimDevice {
    name: String,
    handle: MetronomeHandle,
    task: tokio::task::JoinHandle<Metronome>,
    recorder: Arc<RecordingSink>,
}

fn spawn_device(
    config: &AppConfig,
    mesh: &LoopbackMesh,
    name: &str,
    role: Role,
    clock: &Arc<dyn HardwareClock>,
    wall: &Arc<dyn WallClock>,
) -> SimDevice {
    let recorder = Arc::new(RecordingSink::new(clock.clone()));
    let (mut metronome, beats) = Metronome::new(
        config.clone(),
        clock.clone(),
        wall.clone(),
        recorder.clone(),
        SoundLibrary::from_identifiers(BUILTIN_SOUNDS),
        Handle::current(),
    );
    metronome.set_role(role);
    let (link, peer_events) = mesh.join(name);
    let link: Arc<dyn PeerTransport> = Arc::new(link);
    metronome.attach_transport(link);
    let (handle, task) = metronome.spawn(&Handle::current(), beats, Some(peer_events));
    SimDevice {
        name: name.to_string(),
        handle,
        task,
        recorder,
    }
}

fn run_simulate(
    config: AppConfig,
    bpm: f64,
    clients: usize,
    latency_ms: u64,
    play_secs: f64,
) -> Result<ExitCode> {
    if clients == 0 {
        bail!("simulation needs at least one client");
    }
    let play = seconds(play_secs)?;
    let runtime = build_runtime()?;

    runtime.block_on(async move {
        let clock: Arc<dyn HardwareClock> = Arc::new(SystemHostClock::default());
        let wall: Arc<dyn WallClock> = Arc::new(SystemWallClock::default());
        let mesh = LoopbackMesh::with_latency(Duration::ZERO, Duration::from_millis(latency_ms));

        let mut devices = vec![spawn_device(&config, &mesh, "master", Role::Master, &clock, &wall)];
        for index in 0..clients {
            let name = format!("client-{}", index + 1);
            devices.push(spawn_device(&config, &mesh, &name, Role::Client, &clock, &wall));
        }

        // Let membership and the tempo announcement settle
        tokio::time::sleep(Duration::from_millis(latency_ms + 100)).await;
        let master = &devices[0];
        master.handle.set_bpm(bpm);
        tokio::time::sleep(Duration::from_millis(latency_ms + 50)).await;
        master.handle.toggle_play();

        let lead = config.sync.start_margin_secs.max(0.0) + 1.0;
        tokio::time::sleep(seconds(lead)? + play).await;

        let mut reports = Vec::new();
        let master_first = master.recorder.audible_triggers().first().and_then(|t| t.fired_at);
        for device in devices {
            device.handle.shutdown();
            device.task.await.context("controller task panicked")?;
            let clicks = device.recorder.audible_triggers();
            let offset = match (master_first, clicks.first().and_then(|t| t.fired_at)) {
                (Some(reference), Some(first)) => {
                    Some(clock.host_ticks_to_seconds(first.ticks()) * 1000.0
                        - clock.host_ticks_to_seconds(reference.ticks()) * 1000.0)
                }
                _ => None,
            };
            reports.push(DeviceReport {
                name: device.name,
                clicks: clicks.len(),
                first_click_offset_ms: offset,
            });
        }

        println!("{}", serde_json::to_string_pretty(&reports)?);
        Ok(ExitCode::from(0))
    })
}

fn run_encode(
    config: &AppConfig,
    action: WireAction,
    sender: Role,
    tempo: Option<f64>,
    at: Option<f64>,
) -> Result<ExitCode> {
    let command = match action {
        WireAction::Start => {
            let at = at.unwrap_or_else(|| {
                click_sync::protocol::pick_start_time(
                    SystemWallClock::default().now_unix(),
                    config.sync.start_margin_secs,
                )
            });
            SyncCommand::start(sender, at)?
        }
        WireAction::Stop => SyncCommand::stop(sender),
        WireAction::SetTempo => {
            SyncCommand::set_tempo(sender, tempo.context("--tempo is required for set-tempo")?)?
        }
        WireAction::CueTempo => {
            SyncCommand::cue_tempo(sender, tempo.context("--tempo is required for cue-tempo")?)?
        }
    };
    let bytes = command.encode()?;
    println!("{}", String::from_utf8(bytes).context("wire command is not UTF-8")?);
    Ok(ExitCode::from(0))
}
