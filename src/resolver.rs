//! Discovery of this machine's public address through an IP-echo service.

use std::collections::HashMap;
use std::net::IpAddr;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::address::{AddressFamily, FamilyMismatch, IpAddress};

/// Why the current public address could not be determined.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The echo service could not be reached, or answered with a non-success status.
    #[error("failed to query {url}: {message}")]
    Network { url: String, message: String },

    /// The echo service answered, but its body did not contain an address.
    #[error("could not parse an address out of {body:?}: {message}")]
    Parse { body: String, message: String },

    #[error(transparent)]
    FamilyMismatch(#[from] FamilyMismatch),
}

impl ResolutionError {
    /// Only network failures are worth asking again about; a service that returns garbage will keep returning it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolutionError::Network { .. })
    }
}

/// Anything that can tell us our current public address.
pub trait AddressSource {
    fn resolve(&self, family: AddressFamily) -> Result<IpAddress, ResolutionError>;
}

/// An [`AddressSource`] backed by a public "what is my IP" HTTP endpoint.
#[derive(Debug)]
pub struct HttpResolver {
    client: Client,
    endpoints: HashMap<AddressFamily, String>,
}

impl HttpResolver {
    pub fn new(client: Client) -> Self {
        let endpoints = [AddressFamily::Ipv4, AddressFamily::Ipv6]
            .into_iter()
            .map(|family| (family, family.default_endpoint().to_string()))
            .collect();

        Self { client, endpoints }
    }

    /// Replaces the endpoint queried for one address family.
    pub fn with_endpoint(mut self, family: AddressFamily, url: impl Into<String>) -> Self {
        self.endpoints.insert(family, url.into());
        self
    }

    pub fn endpoint(&self, family: AddressFamily) -> &str {
        self.endpoints.get(&family).map_or(family.default_endpoint(), String::as_str)
    }
}

impl AddressSource for HttpResolver {
    fn resolve(&self, family: AddressFamily) -> Result<IpAddress, ResolutionError> {
        let url = self.endpoint(family);
        let network = |message: String| ResolutionError::Network {
            url: url.to_string(),
            message,
        };

        log::debug!("Requesting {family} address from {url}");

        let res = self.client.get(url).send().map_err(|err| network(err.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(network(format!("server responded with {status}")));
        }

        let body = res.text().map_err(|err| network(format!("failed to read response: {err}")))?;
        parse_echo_response(&body, family)
    }
}

#[derive(Debug, Deserialize)]
struct JsonIp {
    ip: String,
}

/// Extracts an address of the given family out of an IP-echo response body.
///
/// Both `{"ip": "..."}` JSON objects and bare-text bodies are understood. Anything that looks like a JSON object is
/// held to the JSON shape.
pub fn parse_echo_response(body: &str, family: AddressFamily) -> Result<IpAddress, ResolutionError> {
    let text = body.trim();
    let parse_err = |message: String| ResolutionError::Parse {
        body: body.to_string(),
        message,
    };

    let raw = if text.starts_with('{') {
        let json: JsonIp = serde_json::from_str(text).map_err(|err| parse_err(err.to_string()))?;
        json.ip
    } else {
        text.to_string()
    };

    let addr = raw.trim().parse::<IpAddr>().map_err(|err| parse_err(err.to_string()))?;
    Ok(IpAddress::new(family, addr)?)
}
