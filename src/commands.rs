use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Config, ConfigError};
use crate::db::UserStore;
use crate::fetcher::{FetchError, Fetcher};
use crate::handlers::{Agg, Login, Register, Reset, Users};

/// Everything a handler may touch during one invocation.
pub struct State {
    pub config: Config,
    pub store: Box<dyn UserStore>,
    pub fetcher: Fetcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// The argument at `index`, or a `Missing` error naming `what`.
    pub fn arg(&self, index: usize, what: &'static str) -> Result<&str, CommandError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or(CommandError::Missing(what))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("user does not exist")]
    UserNotFound(String),

    #[error("user already exists")]
    UserExists(String),

    #[error("failed to set user")]
    SetUser(#[source] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CommandError {
    /// Conditions reported with their bare message instead of as an error.
    pub fn is_user_conflict(&self) -> bool {
        matches!(self, Self::UserNotFound(_) | Self::UserExists(_))
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, state: &mut State, cmd: &Command) -> Result<(), CommandError>;
}

/// Dispatch table from command name to handler.
#[derive(Default)]
pub struct Commands {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in command registered.
    pub fn with_defaults() -> Self {
        let mut commands = Self::new();
        commands.register("login", Login);
        commands.register("register", Register);
        commands.register("users", Users);
        commands.register("reset", Reset);
        commands.register("agg", Agg);
        commands
    }

    pub fn register<H>(&mut self, name: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn run(&self, state: &mut State, cmd: Command) -> Result<(), CommandError> {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| CommandError::UnknownCommand(cmd.name.clone()))?;

        debug!("Running command '{}' with {} args", cmd.name, cmd.args.len());
        handler.handle(state, &cmd).await
    }
}
