//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod say;
pub mod settings;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::say::{run_say, SayOptions};
use crate::cli::settings::{run_set, run_unset, SETTING_KEYS};
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "lumina")]
#[command(about = "Stream one chat turn from an OpenAI-compatible API")]
#[command(
    long_about = "Lumina runs chat turns against OpenAI-compatible APIs, streaming the \
reply into a conversation as it arrives.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    Your API key (required)\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  LUMINA_LOG        Log filter, e.g. \"lumina=debug\" (overrides RUST_LOG and --log-level)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Model to generate with (defaults to `default_model` from the config file)
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// API base URL (overrides OPENAI_BASE_URL and the config file)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Log level or filter directive written to stderr
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single prompt and print the streamed reply
    Say {
        /// System instruction placed at the head of the conversation
        #[arg(long)]
        system: Option<String>,
        /// Image to attach to the prompt (repeatable)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        /// Prompt text
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Set a config value
    #[command(after_help = setting_keys_help())]
    Set {
        /// Config key, e.g. default-model or auto-speak
        key: String,
        /// Value to store
        #[arg(trailing_var_arg = true, required = true)]
        value: Vec<String>,
    },
    /// Reset a config value to its default
    #[command(after_help = setting_keys_help())]
    Unset {
        /// Config key to reset
        key: String,
    },
}

fn setting_keys_help() -> String {
    format!("Keys: {}", SETTING_KEYS.join(", "))
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    match args.command {
        Commands::Say {
            system,
            images,
            prompt,
        } => {
            run_say(SayOptions {
                prompt,
                system,
                images,
                model: args.model,
                base_url: args.base_url,
            })
            .await
        }
        Commands::Set { key, value } => {
            if let Err(err) = run_set(&key, &value) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Unset { key } => {
            if let Err(err) = run_unset(&key) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
