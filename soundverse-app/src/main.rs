//! Soundverse command-line host.
//!
//! | Command | Does |
//! |---------|------|
//! | `run` | voice assistant on the default audio devices, console speech |
//! | `serve` | the HTTP command service the assistant talks to |
//! | `devices` | list audio devices |
//! | `config` | show or write the settings file |

mod console;
mod server;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{ConsoleRecognizer, ConsoleSynthesizer};
use settings::{default_settings_path, load_settings, save_settings, AssistantSettings};
use soundverse_core::{
    audio::device::{list_devices, DeviceDirection},
    AudioGraphManager, CommandService, CpalDevices, EffectParams, HttpCommandService,
    LocalCommandService, RemoteInterpreter, StopHandle, TurnController,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "soundverse", version, about = "Voice-controlled live audio effects")]
struct Cli {
    /// Settings file (defaults to the platform data directory)
    #[arg(long, global = true, env = "SOUNDVERSE_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice assistant
    Run {
        /// Answer commands in-process instead of calling the command service
        #[arg(long)]
        local: bool,
        /// Command service endpoint
        #[arg(long)]
        command_url: Option<String>,
        /// Preferred microphone name
        #[arg(long)]
        input_device: Option<String>,
    },

    /// Run the HTTP command service
    Serve {
        /// Address to bind, e.g. 127.0.0.1:8000
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// List audio input and output devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the effective settings
    Config {
        /// Write them to the settings file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();

    match cli.command {
        Commands::Run {
            local,
            command_url,
            input_device,
        } => {
            if local {
                settings.command_mode = "local".into();
            }
            if let Some(url) = command_url {
                settings.command_service_url = url;
            }
            if input_device.is_some() {
                settings.preferred_input_device = input_device;
            }
            settings.normalize();
            run_assistant(&settings).await
        }
        Commands::Serve { bind } => server::serve(bind.unwrap_or_else(|| settings.bind_addr())).await,
        Commands::Devices { json } => print_devices(json),
        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if write {
                save_settings(&settings_path, &settings)
                    .with_context(|| format!("writing {}", settings_path.display()))?;
                info!(path = %settings_path.display(), "settings saved");
            }
            Ok(())
        }
    }
}

async fn run_assistant(settings: &AssistantSettings) -> anyhow::Result<()> {
    let config = settings.controller_config();

    let service: Arc<dyn CommandService> = if settings.uses_remote() {
        info!(url = %settings.command_service_url, "using remote command service");
        Arc::new(HttpCommandService::new(settings.command_service_url.clone())?)
    } else {
        info!("using local command replies");
        Arc::new(LocalCommandService)
    };
    let remote = RemoteInterpreter::new(service, config.remote_timeout);

    let devices = CpalDevices::new().with_preferred_input(settings.preferred_input_device.clone());
    let audio = AudioGraphManager::new(Box::new(devices), EffectParams::default());

    let stop = StopHandle::default();
    let recognizer = ConsoleRecognizer::stdin(stop.clone());
    let synthesizer = Arc::new(ConsoleSynthesizer::new(settings.speech_words_per_minute));
    let mut controller = TurnController::new(config, audio, recognizer, synthesizer, remote)
        .with_stop_handle(stop.clone());

    let mut status = controller.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            let effect = event.active_effect.map_or("none", |k| k.label());
            match event.detail {
                Some(detail) => println!("[{:?}] effect: {effect} ({detail})", event.state),
                None => println!("[{:?}] effect: {effect}", event.state),
            }
        }
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => stop.stop(),
            Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
        }
    });

    if let Err(e) = controller.run().await {
        error!("assistant failed: {e}");
        return Err(e.into());
    }
    Ok(())
}

fn print_devices(json: bool) -> anyhow::Result<()> {
    let devices = list_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("no audio devices found");
        return Ok(());
    }
    for device in devices {
        let direction = match device.direction {
            DeviceDirection::Input => "input ",
            DeviceDirection::Output => "output",
        };
        let mut flags = Vec::new();
        if device.is_default {
            flags.push("default");
        }
        if device.is_loopback_like {
            flags.push("loopback");
        }
        println!("{direction}  {}  {}", device.name, flags.join(","));
    }
    Ok(())
}
