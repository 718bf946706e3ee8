use anyhow::{Context, Result};
use serenity::all::{Command, CreateCommand, GuildId, Http};
use tracing::info;

pub const CALLAPI_NAME: &str = "callapi";
pub const CALLAPI_DESCRIPTION: &str = "Calls a web API if the user has the required role.";

/// Where the command set gets published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One guild; changes show up almost immediately.
    Guild(u64),
    /// Every guild the bot is in; Discord may take a while to propagate.
    Global,
}

impl Scope {
    pub fn from_guild_id(guild_id: Option<u64>) -> Self {
        match guild_id {
            Some(id) => Scope::Guild(id),
            None => Scope::Global,
        }
    }
}

pub fn callapi_command() -> CreateCommand {
    CreateCommand::new(CALLAPI_NAME).description(CALLAPI_DESCRIPTION)
}

/// The full command set this bot publishes.
pub fn commands() -> Vec<CreateCommand> {
    vec![callapi_command()]
}

pub async fn register(http: &Http, scope: Scope) -> Result<()> {
    let commands = commands();
    match scope {
        Scope::Guild(id) => {
            let published = GuildId::new(id)
                .set_commands(http, commands)
                .await
                .with_context(|| format!("Failed to sync commands to guild {id}"))?;
            info!("Synced {} command(s) to guild: {}", published.len(), id);
        }
        Scope::Global => {
            let published = Command::set_global_commands(http, commands)
                .await
                .context("Failed to sync commands globally")?;
            info!("Synced {} command(s) globally", published.len());
        }
    }
    Ok(())
}
