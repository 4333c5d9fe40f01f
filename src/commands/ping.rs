use crate::ingest::EngineState;
use crate::{Context, Error};

/// Check that the bot is alive
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    let latency = ctx.ping().await;
    let archiving = match ctx.data().ingestion.state() {
        EngineState::Idle => "idle",
        EngineState::Running => "running",
        EngineState::Disabled => "disabled",
    };
    ctx.say(format!(
        "Pong! Gateway latency: {} ms. Archiving: {}.",
        latency.as_millis(),
        archiving
    ))
    .await?;
    Ok(())
}
