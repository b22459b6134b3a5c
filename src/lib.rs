//! Keeps DNS records pointed at this machine's public address.
//!
//! A run resolves the current address through an IP-echo service ([`resolver`]), loads the records to keep up to date
//! ([`records`]), and reconciles each of them against a DNS provider's API ([`reconcile`], [`provider`]).
//! [`workflow::run`] ties the three together.

pub mod address;
pub mod config;
pub mod http;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod records;
pub mod resolver;
pub mod retry;
pub mod workflow;

use std::env::VarError;

/// Reads an environment variable (after `.env` has been loaded, if enabled).
pub fn get_var(key: &str) -> Result<String, VarError> {
    std::env::var(key)
}
