use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};

/// Builds the blocking HTTP client shared by the address resolver and the DNS providers.
///
/// This runs unattended from a timer, so every request gets a timeout; a hung connection must not stall it forever.
pub fn client(timeout: Duration) -> reqwest::Result<Client> {
    let ua_str = format!("{} {}", clap::crate_name!(), clap::crate_version!());

    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json; charset=utf-8"));
    if let Ok(ua) = HeaderValue::from_str(&ua_str) {
        headers.insert(header::USER_AGENT, ua);
    }

    Client::builder().default_headers(headers).timeout(timeout).build()
}
