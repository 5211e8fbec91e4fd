use std::io::Write;

use anyhow::Context;
use args::Args;
use clap::Parser;
use config::Config;
use llm::{GenerationSettings, LlmClient, Message, SendOptions, StreamDelta};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log)?;

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let client = LlmClient::builder(&config).build()?;

    let mut messages = Vec::with_capacity(2);

    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }

    messages.push(Message::user(args.prompt));

    let settings = GenerationSettings {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..GenerationSettings::new(args.model)
    };

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling the request");
                cancel.cancel();
            }
        }
    });

    let mut options = SendOptions::default();

    let printer = args.stream.then(|| {
        let (sender, receiver) = mpsc::unbounded_channel();
        options.deltas = Some(sender);

        tokio::spawn(print_deltas(receiver))
    });

    let result = client.send_with_context(&messages, &settings, &cancel, options).await;

    if let Some(printer) = printer {
        printer.await?;
    }

    let response = match result {
        Ok(response) => response,
        Err(error) => {
            log::error!("Request failed ({}): {error}", error.error_type());
            return Err(error.into());
        }
    };

    if args.stream {
        println!();
    } else {
        println!("{}", response.text);
    }

    if let Some(usage) = response.usage {
        log::info!(
            "Model {} used {} prompt and {} completion tokens",
            response.model.as_deref().unwrap_or("unknown"),
            usage.prompt_tokens,
            usage.completion_tokens,
        );
    }

    Ok(())
}

async fn print_deltas(mut receiver: mpsc::UnboundedReceiver<StreamDelta>) {
    let mut stdout = std::io::stdout();

    while let Some(delta) = receiver.recv().await {
        match delta {
            StreamDelta::Text(fragment) => {
                let _ = write!(stdout, "{fragment}");
                let _ = stdout.flush();
            }
            StreamDelta::Restart { attempt } => {
                let _ = writeln!(stdout);
                eprintln!("--- retrying (attempt {attempt}) ---");
            }
        }
    }
}
