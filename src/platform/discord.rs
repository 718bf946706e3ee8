use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serenity::all::{
    Client, CommandInteraction, Context, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, EventHandler, GatewayIntents, Http, Interaction, Ready,
    RoleId,
};
use tracing::{debug, error, info, warn};

use crate::command::{CallApiCommand, QuoteEmbed, Reply, Responder};
use crate::platform::Invocation;
use crate::registrar::{self, Scope, CALLAPI_NAME};

/// Gateway event handler: publishes commands on ready, dispatches `/callapi`.
pub struct Handler {
    command: Arc<CallApiCommand>,
    scope: Scope,
    /// Set once the command set has been published. READY repeats on every
    /// re-identify; publishing happens once per process.
    registered: AtomicBool,
}

impl Handler {
    pub fn new(command: Arc<CallApiCommand>, scope: Scope) -> Self {
        Self {
            command,
            scope,
            registered: AtomicBool::new(false),
        }
    }

    /// True for the first caller only, until `release_registration`.
    fn claim_registration(&self) -> bool {
        !self.registered.swap(true, Ordering::SeqCst)
    }

    /// Let the next READY retry after a failed publish.
    fn release_registration(&self) {
        self.registered.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{}", "-".repeat(20));
        info!("Logged in as: {} (ID: {})", ready.user.name, ready.user.id);

        if self.claim_registration() {
            if let Err(e) = registrar::register(&ctx.http, self.scope).await {
                error!("Command registration failed: {:#}", e);
                self.release_registration();
            }
        } else {
            debug!("Commands already published; skipping registration");
        }

        info!("The bot is now ready to accept commands.");
        info!("{}", "-".repeat(20));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        if command.data.name != CALLAPI_NAME {
            warn!("Unhandled command: /{}", command.data.name);
            return;
        }

        let invocation = invocation_from(&command);
        let responder = InteractionResponder {
            http: &ctx.http,
            interaction: &command,
        };

        match self.command.handle(&invocation, &responder).await {
            Ok(outcome) => debug!(
                "/{} for {} finished: {:?}",
                CALLAPI_NAME, invocation.user_id, outcome
            ),
            Err(e) => error!(
                "Failed to respond to /{} for {}: {:#}",
                CALLAPI_NAME, invocation.user_id, e
            ),
        }
    }
}

pub async fn build_client(token: &str, handler: Handler) -> Result<Client> {
    Client::builder(token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await
        .context("Failed to create Discord client")
}

fn invocation_from(command: &CommandInteraction) -> Invocation {
    let role_ids = command
        .member
        .as_ref()
        .map(|member| role_set(&member.roles))
        .unwrap_or_default();

    Invocation {
        user_id: command.user.id.get(),
        user_name: command.user.name.clone(),
        role_ids,
    }
}

fn role_set(roles: &[RoleId]) -> HashSet<u64> {
    roles.iter().map(|id| id.get()).collect()
}

fn build_embed(embed: &QuoteEmbed) -> CreateEmbed {
    let mut builder = CreateEmbed::new()
        .title(&embed.title)
        .description(&embed.description)
        .colour(embed.colour);
    for field in &embed.fields {
        builder = builder.field(&field.name, &field.value, field.inline);
    }
    builder.footer(CreateEmbedFooter::new(&embed.footer))
}

fn build_followup(reply: Reply) -> CreateInteractionResponseFollowup {
    match reply {
        Reply::Embed(embed) => CreateInteractionResponseFollowup::new().embed(build_embed(&embed)),
        Reply::Text(text) => CreateInteractionResponseFollowup::new().content(text),
    }
}

/// Replies to one command interaction through Discord's HTTP API.
struct InteractionResponder<'a> {
    http: &'a Http,
    interaction: &'a CommandInteraction,
}

#[async_trait]
impl Responder for InteractionResponder<'_> {
    async fn deny(&self, text: &str) -> Result<()> {
        let message = CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true);
        self.interaction
            .create_response(self.http, CreateInteractionResponse::Message(message))
            .await
            .context("Failed to send denial")
    }

    async fn defer(&self) -> Result<()> {
        self.interaction
            .defer(self.http)
            .await
            .context("Failed to defer interaction")
    }

    async fn follow_up(&self, reply: Reply) -> Result<()> {
        self.interaction
            .create_followup(self.http, build_followup(reply))
            .await
            .context("Failed to send follow-up")?;
        Ok(())
    }
}
