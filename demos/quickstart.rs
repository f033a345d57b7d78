use anyhow::Result;
use glass_desktop::{
    ActionExecutor, Agent, AgentConfig, AgentEvent, AnthropicClient, ClientConfig, DisplayConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let task = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let task = if task.trim().is_empty() {
        "Open a new browser tab, search for the Rust programming language and summarize the first result.".to_string()
    } else {
        task
    };

    let client = AnthropicClient::new(ClientConfig::default())?;
    let computer = ActionExecutor::launch(DisplayConfig::default()).await?;
    let agent = Agent::new(computer, client, AgentConfig::default());

    let outcome = agent
        .execute(&task, |event| match event {
            AgentEvent::Screenshot { base64 } => println!("[screenshot] {} bytes", base64.len()),
            AgentEvent::Action { action } => println!("[action] {}", action.label()),
            AgentEvent::Text { content } => println!("[text] {content}"),
        })
        .await;

    // The agent never tears the display down; always do it here.
    agent.computer().stop().await;

    let report = outcome?;
    println!("{} ({} iterations)", report.summary(), report.iterations);
    Ok(())
}
