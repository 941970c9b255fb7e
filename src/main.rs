//! Maple CLI - run the pulse generator or inspect MIDI ports

use clap::{Parser, Subcommand};
use maple::broadcast::EventBus;
use maple::config::AppConfig;
use maple::control::Controller;
use maple::midi_output::{MidiPortOutput, OutputSink, PortControl};
use maple::osc_server::OscServer;
use maple::state::{self, AppState};
use maple::store::StateStore;
use maple::transport::Transport;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "maple")]
#[command(about = "Multi-voice probabilistic MIDI pulse generator", long_about = None)]
struct Cli {
    /// Config file (default: ./maple.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the generation loop and the OSC control server
    Serve {
        /// OSC port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// MIDI output device name (partial match) instead of the virtual port
        #[arg(short, long)]
        midi_port: Option<String>,

        /// State document to load and save
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Tempo in BPM, overriding the stored state
        #[arg(short, long)]
        tempo: Option<u32>,

        /// Start playing immediately
        #[arg(long)]
        play: bool,
    },

    /// List MIDI output ports and exit
    Ports,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = AppConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Ports => {
            let ports = MidiPortOutput::list_ports()?;
            if ports.is_empty() {
                println!("No MIDI output ports found");
            }
            for (index, name) in ports.iter().enumerate() {
                println!("{:>3}  {}", index, name);
            }
        }

        Commands::Serve {
            port,
            midi_port,
            state,
            tempo,
            play,
        } => {
            if let Some(port) = port {
                config.server.osc_port = port;
            }
            if let Some(name) = midi_port {
                config.midi.port = Some(name);
            }
            if let Some(path) = state {
                config.state.path = path;
            }

            let store = StateStore::new(config.state.path.clone());
            info!("State file: {}", store.path().display());
            let mut initial = if config.state.load_on_start {
                store.load_or_default()
            } else {
                AppState::default()
            };
            initial.playing = play;
            if let Some(bpm) = tempo {
                initial.tempo = bpm.clamp(1, state::MAX_TEMPO);
            }
            info!(
                "Starting with {} voices at {} BPM",
                initial.voices.len(),
                initial.tempo
            );

            let output = Arc::new(MidiPortOutput::open_default());
            if let Some(name) = &config.midi.port {
                if let Err(e) = output.open_named(name) {
                    warn!("Could not open MIDI port '{}': {}", name, e);
                }
            }
            info!(
                "MIDI output: {}",
                output.active_port_name().unwrap_or_else(|| "none".into())
            );

            let shared = state::shared(initial);
            let bus = EventBus::default();

            let transport = Transport::new(
                shared.clone(),
                output.clone() as Arc<dyn OutputSink>,
                Arc::new(bus.clone()),
                config.transport.clone(),
            );
            tokio::spawn(transport.run());

            let controller = Arc::new(Controller::new(
                shared,
                store,
                Arc::new(bus.clone()),
                output.clone() as Arc<dyn PortControl>,
            ));
            let server = OscServer::bind(&config.server.addr(), controller, bus).await?;

            tokio::select! {
                result = server.run() => {
                    if let Err(e) = result {
                        error!("OSC server stopped: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                }
            }
            output.all_notes_off()?;
        }
    }

    Ok(())
}
