//! Gator - A command-line RSS aggregator
//!
//! This crate keeps the active user in `~/.gatorconfig.json`, stores user
//! records in a SQLite database and fetches RSS feeds over HTTP. Each process
//! run dispatches exactly one command through a name-to-handler table.

pub mod commands;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod handlers;
