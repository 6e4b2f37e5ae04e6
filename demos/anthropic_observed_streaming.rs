use std::io::Write;

use futures::StreamExt;
use parley::client::{CompletionClient, ProviderClient};
use parley::completion::{ChatModel, ChatOptions, Prompt};
use parley::providers::anthropic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let client = anthropic::Client::from_env()?;
    let haiku = client
        .completion_model(anthropic::CLAUDE_3_HAIKU)
        .with_default_options(ChatOptions::builder().temperature(0.5).build());

    let mut stream = haiku
        .stream(Prompt::new("When and where is the next solar eclipse?"))
        .await?;

    // Print chunks as they arrive, the observation closes when the stream ends
    while let Some(response) = stream.next().await {
        if let Some(text) = response?.text() {
            print!("{text}");
            std::io::stdout().flush()?;
        }
    }
    println!();

    let aggregated = stream.aggregated();
    println!("Finish reasons: {:?}", aggregated.metadata.finish_reasons);
    println!("Token usage: {:?}", aggregated.metadata.usage);

    Ok(())
}
