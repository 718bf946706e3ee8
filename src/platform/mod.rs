pub mod discord;

use std::collections::HashSet;

/// A command invocation received from any platform
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Platform-specific user ID
    pub user_id: u64,
    /// Display name of the user
    pub user_name: String,
    /// Roles the member holds where the command was used. Empty outside a guild.
    pub role_ids: HashSet<u64>,
}
