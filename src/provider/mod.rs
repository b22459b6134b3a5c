//! DNS provider APIs that records are published through.

mod alidns;
mod porkbun;

use std::fmt::{self, Display};

use reqwest::blocking::Client;
use serde::Deserialize;

pub use self::alidns::{AliDns, classify_alidns_error};
pub use self::porkbun::Porkbun;
use crate::address::IpAddress;
use crate::records::RecordTarget;

/// Message Alibaba Cloud DNS (and anything built on top of it) returns when asked to write a record that is already
/// there with exactly the same content.
pub const ALREADY_EXISTS_MESSAGE: &str = "The DNS record already exists";

/// A record as it currently exists on the provider's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRecord {
    /// Provider-specific record identifier, when the provider has one.
    pub id: Option<String>,
    pub content: String,
    pub ttl: Option<u32>,
}

/// What the caller already found out about a record before asking for it to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownRecord<'a> {
    /// Nobody looked; the provider has to find out for itself if it needs to.
    Unknown,
    Absent,
    Present(&'a ExistingRecord),
}

impl<'a> From<Option<&'a ExistingRecord>> for KnownRecord<'a> {
    fn from(found: Option<&'a ExistingRecord>) -> Self {
        match found {
            Some(existing) => KnownRecord::Present(existing),
            None => KnownRecord::Absent,
        }
    }
}

/// A raw, not-yet-classified failure from a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    /// The request never got a response (DNS failure, refused connection, timeout...).
    Transport(String),
    /// The provider answered and said no.
    Api {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    /// The provider answered with something that could not be understood.
    Malformed(String),
}

impl ProviderFailure {
    pub fn message(&self) -> &str {
        match self {
            ProviderFailure::Transport(msg) | ProviderFailure::Malformed(msg) => msg,
            ProviderFailure::Api { message, .. } => message,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderFailure::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderFailure::Api { status, .. } => *status,
            _ => None,
        }
    }
}

impl Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderFailure::Transport(msg) => write!(f, "request failed: {msg}"),
            ProviderFailure::Malformed(msg) => write!(f, "unexpected response: {msg}"),
            ProviderFailure::Api { status, code, message } => {
                match (status, code) {
                    (Some(status), Some(code)) => write!(f, "[{status} {code}] ")?,
                    (Some(status), None) => write!(f, "[{status}] ")?,
                    (None, Some(code)) => write!(f, "[{code}] ")?,
                    (None, None) => {},
                }
                f.write_str(message)
            },
        }
    }
}

/// How the reconciler should react to a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The record is already there with the content we wanted; counts as success.
    AlreadyExists,
    /// Worth trying again.
    Transient,
    /// Will fail the same way every time (bad credentials, malformed request...).
    Permanent,
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{failure}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub failure: ProviderFailure,
}

/// Classifier used by providers that do not report structured error codes.
///
/// Falls back to looking for [`ALREADY_EXISTS_MESSAGE`] in the error text. Client errors (4xx) other than timeouts
/// and rate limiting are permanent; server errors, transport errors and unreadable responses are transient.
pub fn classify_provider_error(failure: &ProviderFailure) -> ProviderErrorKind {
    if failure.message().contains(ALREADY_EXISTS_MESSAGE) {
        return ProviderErrorKind::AlreadyExists;
    }

    match failure.status() {
        Some(408 | 429) => ProviderErrorKind::Transient,
        Some(400..=499) => ProviderErrorKind::Permanent,
        _ => ProviderErrorKind::Transient,
    }
}

/// The operations the reconciler needs from a DNS management API.
pub trait DnsProvider {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether [`query_record`][Self::query_record] actually asks the provider anything.
    fn supports_query(&self) -> bool {
        true
    }

    /// Looks up the current record for `target`, if there is one.
    fn query_record(&self, target: &RecordTarget) -> Result<Option<ExistingRecord>, ProviderFailure>;

    /// Creates the record for `target`, or updates it if it already exists.
    ///
    /// `known` carries the result of a lookup the caller already made, so the provider need not repeat it.
    fn upsert_record(
        &self,
        target: &RecordTarget,
        value: &IpAddress,
        ttl: u32,
        known: KnownRecord<'_>,
    ) -> Result<(), ProviderFailure>;

    /// Decides what a failure from this provider means.
    fn classify(&self, failure: &ProviderFailure) -> ProviderErrorKind {
        classify_provider_error(failure)
    }
}

impl<P: DnsProvider + ?Sized> DnsProvider for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn supports_query(&self) -> bool {
        (**self).supports_query()
    }

    fn query_record(&self, target: &RecordTarget) -> Result<Option<ExistingRecord>, ProviderFailure> {
        (**self).query_record(target)
    }

    fn upsert_record(
        &self,
        target: &RecordTarget,
        value: &IpAddress,
        ttl: u32,
        known: KnownRecord<'_>,
    ) -> Result<(), ProviderFailure> {
        (**self).upsert_record(target, value, ttl, known)
    }

    fn classify(&self, failure: &ProviderFailure) -> ProviderErrorKind {
        (**self).classify(failure)
    }
}

/// Which provider API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Alibaba Cloud DNS.
    #[serde(alias = "aliyun")]
    AliDns,
    Porkbun,
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::AliDns => "alidns",
            ProviderKind::Porkbun => "porkbun",
        })
    }
}

/// Constructs the configured provider, reading its credentials from the environment.
pub fn from_env(kind: ProviderKind, client: Client) -> eyre::Result<Box<dyn DnsProvider>> {
    Ok(match kind {
        ProviderKind::AliDns => Box::new(AliDns::from_env(client)?),
        ProviderKind::Porkbun => Box::new(Porkbun::from_env(client)?),
    })
}

/// Reads a required credential out of the environment.
fn credential(var: &str) -> eyre::Result<String> {
    match crate::get_var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(eyre::eyre!("Missing credential: environment variable {var} is not set")),
    }
}
