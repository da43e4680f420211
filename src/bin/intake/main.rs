use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use intake::audio::device;
use intake::config::Config;
use intake::error::IntakeError;

#[derive(Parser)]
#[command(
    name = "intake",
    about = "Talk your way through an application form",
    long_about = "Intake is a voice client for a conversational data-collection assistant. \
        It streams microphone audio to the assistant over a websocket, plays back \
        the assistant's synthesized speech, and shows the conversation and the \
        fields the assistant has extracted as it goes. The microphone is muted \
        while the assistant is speaking."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/intake/config.yaml. Built-in defaults are used
    /// when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the intake crate, showing session
    /// state transitions, every inbound message type, and device details.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session (foreground)
    ///
    /// Connects to the configured server, waits for it to acknowledge the
    /// audio format, then streams the microphone until Ctrl+C or until the
    /// server ends the session.
    Run {
        /// Server URL, overriding the config file (ws:// or wss://)
        #[arg(long)]
        url: Option<String>,
    },

    /// List available audio input and output devices
    Devices,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn load_config(cli: &Cli) -> Result<Config, IntakeError> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("intake=debug,info")
    } else {
        EnvFilter::new("intake=info,warn")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), IntakeError> {
    match cli.command {
        Command::Run { ref url } => {
            let mut config = load_config(&cli)?;
            if let Some(url) = url {
                config.set_server_url(url)?;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(intake::live::run_live(config))
        }
        Command::Devices => run_devices(),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "intake", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn print_device_list(devices: &[String], default_name: Option<&str>) {
    if devices.is_empty() {
        println!("  (none)");
        return;
    }
    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
}

fn run_devices() -> Result<(), IntakeError> {
    let inputs = device::list_input_devices()?;
    let outputs = device::list_output_devices()?;

    println!("Input devices:");
    print_device_list(&inputs, device::default_input_device_name().as_deref());
    println!("Output devices:");
    print_device_list(&outputs, device::default_output_device_name().as_deref());

    Ok(())
}
