mod doctor;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zorkai::{ChatMessage, ChatRequest, Gateway, GatewayConfig};

#[derive(Parser)]
#[command(name = "zorkai", version, about = "Resilient chat-completion gateway")]
struct Cli {
    /// Config file (defaults to ~/.zorkai/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one chat completion and print the answer
    Complete {
        /// Model identifier as the endpoint expects it
        #[arg(short, long)]
        model: String,

        /// User message
        #[arg(short, long)]
        prompt: String,

        /// Optional system message
        #[arg(short, long)]
        system: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u64>,

        /// Print the whole normalized response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe the configured endpoint and report breaker state
    Doctor {
        /// Model to probe with
        #[arg(short, long, default_value = "gpt-4o-mini")]
        model: String,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<GatewayConfig> {
    let path = path.unwrap_or_else(GatewayConfig::default_path);
    let config = GatewayConfig::load(&path)?.with_env(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zorkai=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Complete {
            model,
            prompt,
            system,
            temperature,
            max_tokens,
            json,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));

            let mut request = ChatRequest::new(model, messages);
            request.temperature = temperature;
            request.max_tokens = max_tokens;

            let mut gateway = Gateway::new(config)?;
            let response = gateway.complete(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if response.is_empty() {
                tracing::warn!("Endpoint answered with empty content");
            } else {
                println!("{}", response.content);
            }
        }
        Commands::Doctor { model } => {
            doctor::run_doctor(config, &model).await?;
        }
    }

    Ok(())
}
