use crate::ask::{AskRequest, Responder, SendError, SummaryCard};
use crate::{Context, Error};
use async_trait::async_trait;
use chrono::Utc;
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter, Timestamp};

/// Replies into the invoking channel or interaction.
pub struct ReplyResponder<'a> {
    ctx: Context<'a>,
}

impl<'a> ReplyResponder<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Responder for ReplyResponder<'_> {
    async fn say(&self, text: &str) -> Result<(), SendError> {
        self.ctx
            .say(text)
            .await
            .map(|_| ())
            .map_err(|e| SendError::Rejected(e.to_string()))
    }

    async fn send_card(&self, card: &SummaryCard) -> Result<(), SendError> {
        let embed = CreateEmbed::new()
            .title(&card.title)
            .description(&card.description)
            .footer(CreateEmbedFooter::new(&card.footer))
            .color(0x3498DB)
            .timestamp(Timestamp::now());
        self.ctx
            .send(poise::CreateReply::default().embed(embed))
            .await
            .map(|_| ())
            .map_err(|e| SendError::Rejected(e.to_string()))
    }
}

/// Ask a question about the archived channel
#[poise::command(prefix_command, slash_command)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question about the archived messages"]
    #[rest]
    question: String,
) -> Result<(), Error> {
    let request = AskRequest {
        question,
        requester_id: ctx.author().id.get(),
        requester_name: ctx.author().name.clone(),
        received_at: Utc::now(),
    };
    let responder = ReplyResponder::new(ctx);
    ctx.data().pipeline.handle(&request, &responder).await;
    Ok(())
}
