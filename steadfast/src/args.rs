use std::path::PathBuf;

use clap::Parser;

/// Send one prompt to a chat-completion endpoint and print the response.
#[derive(Debug, Parser)]
#[command(name = "steadfast", version)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "STEADFAST_CONFIG_PATH", default_value = "./steadfast.toml")]
    pub config: PathBuf,

    /// Model identifier, e.g. `openai/gpt-4o-mini`
    #[arg(short, long, env = "STEADFAST_MODEL")]
    pub model: String,

    /// Optional system prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Sampling temperature
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Upper bound for generated tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Print fragments as they arrive instead of waiting for the whole response
    #[arg(long)]
    pub stream: bool,

    /// Log filter, e.g. `info` or `llm=debug,steadfast=debug`
    #[arg(long, env = "STEADFAST_LOG", default_value = "warn")]
    pub log: String,

    /// The user prompt
    pub prompt: String,
}
