//! Command registry
//!
//! Built once at startup and handed to the dispatcher.

use super::{admin, replication, search, string, Command};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of all available commands
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Create a new command registry and register all commands
    pub fn new() -> Self {
        let mut registry = CommandRegistry {
            commands: HashMap::new(),
        };

        // Connection and server commands
        registry.register(Arc::new(admin::PingCommand));
        registry.register(Arc::new(admin::EchoCommand));
        registry.register(Arc::new(admin::InfoCommand));
        registry.register(Arc::new(admin::ConfigCommand));

        // Register string commands
        registry.register(Arc::new(string::SetCommand));
        registry.register(Arc::new(string::GetCommand));

        // Register search commands
        registry.register(Arc::new(search::KeysCommand));

        // Replication handshake
        registry.register(Arc::new(replication::ReplConfCommand));
        registry.register(Arc::new(replication::PsyncCommand));

        registry
    }

    /// Register a command
    fn register(&mut self, command: Arc<dyn Command>) {
        let name = command.name().to_uppercase();
        self.commands.insert(name, command);
    }

    /// Get a command by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(&name.to_uppercase()).cloned()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
