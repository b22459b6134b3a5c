//! The list of DNS records a run keeps up to date.

use std::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::address::AddressFamily;

/// A DNS record type. Only `A` and `AAAA` carry addresses, but any type name is carried through untouched: the
/// provider is the one that decides what it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum RecordType {
    A,
    Aaaa,
    Other(String),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Other(other) => other,
        }
    }

    /// Which address family this record type stores, if it is an address record at all.
    pub fn family(&self) -> Option<AddressFamily> {
        match self {
            RecordType::A => Some(AddressFamily::Ipv4),
            RecordType::Aaaa => Some(AddressFamily::Ipv6),
            RecordType::Other(_) => None,
        }
    }
}

impl From<String> for RecordType {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("A") {
            RecordType::A
        } else if value.eq_ignore_ascii_case("AAAA") {
            RecordType::Aaaa
        } else {
            RecordType::Other(value)
        }
    }
}

impl From<&str> for RecordType {
    fn from(value: &str) -> Self {
        RecordType::from(value.to_string())
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record to reconcile: `sub.domain` of type `type`.
///
/// Deserializes from `{ "sub": "...", "domain": "...", "type": "..." }`, the same shape in JSON record files and
/// inline TOML tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct RecordTarget {
    #[serde(rename = "sub")]
    subdomain: String,
    domain: String,
    #[serde(rename = "type")]
    record_type: RecordType,
}

impl RecordTarget {
    pub fn new(subdomain: impl Into<String>, domain: impl Into<String>, record_type: impl Into<RecordType>) -> Self {
        Self {
            subdomain: subdomain.into(),
            domain: domain.into(),
            record_type: record_type.into(),
        }
    }

    pub fn subdomain(&self) -> &str {
        &self.subdomain
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    /// Whether this target refers to the zone apex (`@` or an empty subdomain).
    pub fn is_apex(&self) -> bool {
        self.subdomain.is_empty() || self.subdomain == "@"
    }

    /// The fully-qualified record name, without a trailing dot.
    pub fn fqdn(&self) -> String {
        if self.is_apex() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.subdomain, self.domain)
        }
    }
}

/// Formats as `sub.domain/TYPE`, the way targets are referred to in logs. Both spellings of the apex print as
/// `domain/TYPE`.
impl Display for RecordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fqdn(), self.record_type)
    }
}

/// Where the record list for a run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// A list held in memory (written inline in the configuration file).
    Fixed(Vec<RecordTarget>),
    /// A JSON file containing an array of record objects.
    File(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("record file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read record file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record file is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    #[error("record file has the wrong shape: {0}")]
    Schema(String),
}

impl RecordSource {
    /// Produces the targets for this run, in the order they were written.
    pub fn load(&self) -> Result<Vec<RecordTarget>, LoadError> {
        match self {
            RecordSource::Fixed(targets) => Ok(targets.clone()),
            RecordSource::File(path) => load_file(path),
        }
    }
}

fn load_file(path: &Path) -> Result<Vec<RecordTarget>, LoadError> {
    log::trace!("Reading records from {}", path.display());

    let text = std::fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    parse_records(&text)
}

/// Parses a JSON array of `{ "sub", "domain", "type" }` objects.
///
/// Field values are not checked for legality (e.g., whether the domain is a real domain name); that is left to the
/// DNS provider.
pub fn parse_records(text: &str) -> Result<Vec<RecordTarget>, LoadError> {
    let json: JsonValue = serde_json::from_str(text).map_err(LoadError::InvalidJson)?;

    let JsonValue::Array(items) = json else {
        return Err(LoadError::Schema(format!("expected an array of records, found {}", json_kind(&json))));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).map_err(|err| LoadError::Schema(format!("record {}: {err}", i + 1)))
        })
        .collect()
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
