use parley::client::{CompletionClient, ProviderClient};
use parley::completion::{ChatModel, ChatOptions, Message, Prompt};
use parley::providers::anthropic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Print every observation with its attributes when it closes
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let client = anthropic::Client::from_env()?;
    let sonnet = client.completion_model(anthropic::CLAUDE_3_5_SONNET);

    let options = ChatOptions::builder()
        .max_tokens(256)
        .stop_sequences(["this-is-the-end"])
        .temperature(0.7)
        .top_k(1)
        .build();

    let prompt = Prompt::from_messages(vec![
        Message::system("Answer in at most two sentences."),
        Message::user("Why does a raven look like a desk?"),
    ])
    .with_options(options);

    let response = sonnet.call(prompt).await?;

    println!("{}", response.text().unwrap_or_default());
    println!("Token usage: {usage:?}", usage = response.metadata.usage);

    Ok(())
}
