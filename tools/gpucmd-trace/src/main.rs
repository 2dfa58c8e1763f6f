use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gpucmd_ipc::Size;
use gpucmd_protocol::CommandNames;
use gpucmd_service::ServiceConfig;
use gpucmd_trace::{dump, read_trace, replay, ReplayOptions};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gpucmd-trace", about = "Inspect and replay recorded GPU command streams.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every command with its entry offset, name and argument count
    Dump {
        /// Trace file (little-endian 32-bit entries)
        trace: PathBuf,

        /// Also print the raw argument entries
        #[arg(long, action = clap::ArgAction::SetTrue)]
        args: bool,
    },
    /// Run the stream through a headless decoder on the software driver
    Replay {
        /// Trace file (little-endian 32-bit entries)
        trace: PathBuf,

        /// Service configuration (JSON)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Offscreen surface width
        #[arg(long, default_value_t = 64)]
        width: u32,

        /// Offscreen surface height
        #[arg(long, default_value_t = 64)]
        height: u32,

        /// Size of transfer buffer 1, available to the stream
        #[arg(long, value_name = "BYTES", default_value_t = 64 * 1024)]
        transfer_buffer_bytes: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    run(Args::parse())
}

fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Dump { trace, args } => {
            let bytes = fs::read(&trace).with_context(|| format!("read {}", trace.display()))?;
            let words = read_trace(&bytes)?;
            for entry in dump(&words, &CommandNames::new())? {
                if args {
                    let hex: Vec<String> = entry.args.iter().map(|a| format!("{a:#010x}")).collect();
                    println!("{entry}  [{}]", hex.join(" "));
                } else {
                    println!("{entry}");
                }
            }
        }
        Command::Replay {
            trace,
            config,
            width,
            height,
            transfer_buffer_bytes,
        } => {
            let bytes = fs::read(&trace).with_context(|| format!("read {}", trace.display()))?;
            let words = read_trace(&bytes)?;
            let config = match config {
                Some(path) => {
                    let json = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
                    ServiceConfig::from_json_str(&json).with_context(|| format!("parse {}", path.display()))?
                }
                None => ServiceConfig::default(),
            };
            let options = ReplayOptions {
                config,
                surface_size: Size::new(width, height),
                transfer_buffer_bytes,
            };
            let report = replay(&words, &options)?;
            print!("{report}");
        }
    }
    Ok(())
}
