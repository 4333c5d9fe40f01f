use crate::access::RESTRICTED_MESSAGE;
use crate::diagnostics::{render_digest, DIGEST_CAP};
use crate::{Context, Error};
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter, Timestamp};

const SOURCE: &str = "LOGS-CMD";

/// Show the most recent ask command logs
#[poise::command(prefix_command, slash_command)]
pub async fn logs(ctx: Context<'_>) -> Result<(), Error> {
    let data = ctx.data();
    let requester = format!("{} (ID: {})", ctx.author().name, ctx.author().id);

    if !data.allow_list.permits(ctx.author().id.get()) {
        data.diagnostics
            .info(SOURCE, format!("logs denied for {}", requester));
        ctx.say(RESTRICTED_MESSAGE).await?;
        return Ok(());
    }

    let entries = data.diagnostics.recent();
    let Some(digest) = render_digest(&entries, DIGEST_CAP) else {
        ctx.say("No ask command logs have been recorded yet.").await?;
        return Ok(());
    };

    let embed = CreateEmbed::new()
        .title("Recent ask command logs")
        .description(digest)
        .footer(CreateEmbedFooter::new("Most recent entries first."))
        .color(0xF1C40F)
        .timestamp(Timestamp::now());

    if let Err(e) = ctx.send(poise::CreateReply::default().embed(embed)).await {
        data.diagnostics
            .warn(SOURCE, format!("Log digest rejected for {}: {}", requester, e));
        ctx.say("Could not display the logs; they may be too large.").await?;
    }
    Ok(())
}
