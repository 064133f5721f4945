//! Built-in command handlers.

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::commands::{Command, CommandError, Handler, State};
use crate::db::{CreateUserParams, User};
use crate::fetcher::RssFeed;

/// `login <username>`: switch the active user to an existing one.
pub struct Login;

#[async_trait]
impl Handler for Login {
    async fn handle(&self, state: &mut State, cmd: &Command) -> Result<(), CommandError> {
        let name = cmd.arg(0, "username")?;

        let user = state
            .store
            .get_user(name)
            .await
            .context("failed to look up user")?;
        if user.is_none() {
            return Err(CommandError::UserNotFound(name.to_string()));
        }

        state.config.set_user(name).map_err(CommandError::SetUser)?;

        println!("User set to '{}'", name);
        Ok(())
    }
}

/// `register <username>`: create a user and make it the active one.
pub struct Register;

#[async_trait]
impl Handler for Register {
    async fn handle(&self, state: &mut State, cmd: &Command) -> Result<(), CommandError> {
        let name = cmd.arg(0, "username")?;

        let existing = state
            .store
            .get_user(name)
            .await
            .context("failed to look up user")?;
        if existing.is_some() {
            return Err(CommandError::UserExists(name.to_string()));
        }

        let user = state
            .store
            .create_user(CreateUserParams::new(name))
            .await
            .context("failed to create user")?;

        state.config.set_user(name).map_err(CommandError::SetUser)?;

        println!("User '{}' created", user.name);
        debug!("User details: {:?}", user);
        Ok(())
    }
}

/// `users`: list every registered user, marking the active one.
pub struct Users;

#[async_trait]
impl Handler for Users {
    async fn handle(&self, state: &mut State, _cmd: &Command) -> Result<(), CommandError> {
        let users = state
            .store
            .get_users()
            .await
            .context("failed to list users")?;

        let current = state.config.current_user_name.as_deref();
        for line in user_lines(&users, current) {
            println!("{}", line);
        }
        Ok(())
    }
}

fn user_lines(users: &[User], current: Option<&str>) -> Vec<String> {
    users
        .iter()
        .map(|user| {
            if current == Some(user.name.as_str()) {
                format!("* {} (current)", user.name)
            } else {
                format!("* {}", user.name)
            }
        })
        .collect()
}

/// `reset`: delete every user record.
pub struct Reset;

#[async_trait]
impl Handler for Reset {
    async fn handle(&self, state: &mut State, _cmd: &Command) -> Result<(), CommandError> {
        let deleted = state
            .store
            .delete_users()
            .await
            .context("failed to reset users")?;

        info!("Deleted {} users", deleted);
        println!("Database reset: removed {} users", deleted);
        Ok(())
    }
}

/// `agg <url>`: fetch one feed and print its titles.
pub struct Agg;

#[async_trait]
impl Handler for Agg {
    async fn handle(&self, state: &mut State, cmd: &Command) -> Result<(), CommandError> {
        let url = cmd.arg(0, "feed url")?;

        let feed = state.fetcher.fetch_feed(url).await?;

        for line in feed_lines(&feed) {
            println!("{}", line);
        }
        Ok(())
    }
}

/// Channel title, then one ` - title` line per item.
fn feed_lines(feed: &RssFeed) -> Vec<String> {
    let channel = &feed.channel;
    std::iter::once(channel.title.clone())
        .chain(channel.items.iter().map(|item| format!(" - {}", item.title)))
        .collect()
}
