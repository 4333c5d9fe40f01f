use chronicle::access::AllowList;
use chronicle::ask::{AskPipeline, SummarySettings};
use chronicle::commands::{ask, logs, ping};
use chronicle::db::{Archive, Database};
use chronicle::diagnostics::{forward_to_channel, Diagnostics};
use chronicle::ingest::IngestionEngine;
use chronicle::llm::{LanguageModel, LlmClient};
use chronicle::transport::SerenityHistory;
use chronicle::{config::Config, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);
    let discord_token = config.discord_token.clone();

    let archive: Option<Arc<dyn Archive>> = match open_archive(&config) {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            error!("Archive unavailable, ask and archiving are disabled: {}", e);
            None
        }
    };

    let llm: Option<Arc<dyn LanguageModel>> = match LlmClient::new(&config) {
        Ok(Some(client)) => {
            info!("Language model: {} at {}", client.model(), config.llm_url);
            Some(Arc::new(client))
        }
        Ok(None) => {
            warn!("LLM_MODEL is not set; the ask command will report the AI module as unconfigured");
            None
        }
        Err(e) => {
            error!("Failed to build the language model client: {}", e);
            None
        }
    };

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ask::ask(), logs::logs(), ping::ping()],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("!".into()),
                ..Default::default()
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot is ready as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let mut diagnostics = Diagnostics::default();
                if let Some(log_channel_id) = config.log_channel_id {
                    let (tx, rx) = mpsc::unbounded_channel();
                    diagnostics = diagnostics.with_channel(tx);
                    tokio::spawn(forward_to_channel(ctx.http.clone(), log_channel_id, rx));
                }

                let ingestion = Arc::new(IngestionEngine::new(
                    archive.clone(),
                    Arc::new(SerenityHistory::new(ctx.http.clone())),
                    config.target_channel_id,
                    config.ingest_interval,
                    chrono::Duration::days(config.ingest_lookback_days),
                    diagnostics.clone(),
                ));
                tokio::spawn(ingestion.clone().run());

                let allow_list = AllowList::new(config.allowed_user_ids.clone());
                if allow_list.is_restricted() {
                    info!("ask and logs are limited to {} allowed users", config.allowed_user_ids.len());
                } else {
                    warn!("ALLOWED_USER_IDS is empty; ask and logs are open to everyone");
                }
                let pipeline = AskPipeline::new(
                    archive,
                    llm,
                    allow_list.clone(),
                    SummarySettings::from(&config),
                    diagnostics.clone(),
                );

                Ok(Data {
                    diagnostics,
                    allow_list,
                    pipeline,
                    ingestion,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

fn open_archive(config: &Config) -> anyhow::Result<Database> {
    let db = Database::new(config)?;
    db.execute_init()?;
    info!("Archive opened at {}", config.database_url);
    Ok(db)
}
