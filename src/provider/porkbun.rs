use chrono::Local;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use super::{DnsProvider, ExistingRecord, KnownRecord, ProviderFailure, credential};
use crate::address::IpAddress;
use crate::records::RecordTarget;

const BASE_URL: &str = "https://api.porkbun.com/api/json/v3";

type JsonObject = JsonMap<String, JsonValue>;

/// The access point to the Porkbun API.
pub struct Porkbun {
    client: Client,
    api_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Porkbun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Porkbun").finish_non_exhaustive()
    }
}

impl Porkbun {
    pub fn new(client: Client, api_key: String, secret_key: String) -> Self {
        Self {
            client,
            api_key,
            secret_key,
        }
    }

    /// Creates a client using the `PORKBUN_API_KEY` and `PORKBUN_SECRET_KEY` environment variables.
    pub fn from_env(client: Client) -> eyre::Result<Self> {
        Ok(Self::new(client, credential("PORKBUN_API_KEY")?, credential("PORKBUN_SECRET_KEY")?))
    }

    /// Builds the `{domain}/{type}/{subdomain}` path suffix used by Porkbun's by-name-and-type endpoints. Apex records
    /// have no subdomain component.
    fn name_type_path(target: &RecordTarget) -> String {
        let base = format!("{}/{}", target.domain(), target.record_type());
        if target.is_apex() {
            base
        } else {
            format!("{base}/{}", target.subdomain())
        }
    }

    /// Makes a POST request to Porkbun's API and returns the result parsed from JSON.
    ///
    /// Credentials are added to whatever payload is given; `payload` must be a JSON object (or null).
    fn request<R>(&self, url: &str, payload: JsonValue) -> Result<R, ProviderFailure>
    where
        R: DeserializeOwned,
    {
        let mut payload = match payload {
            JsonValue::Object(map) => map,
            _ => JsonObject::new(),
        };

        payload.insert("apikey".to_string(), json!(self.api_key));
        payload.insert("secretapikey".to_string(), json!(self.secret_key));

        // Read the response as raw text before parsing it ourselves, so errors can quote what actually came back.
        let res = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .map_err(|err| ProviderFailure::Transport(err.to_string()))?;
        let status = res.status().as_u16();
        let text = res.text().map_err(|err| ProviderFailure::Transport(err.to_string()))?;

        parse_response(status, &text)
    }
}

impl DnsProvider for Porkbun {
    fn name(&self) -> &'static str {
        "porkbun"
    }

    fn query_record(&self, target: &RecordTarget) -> Result<Option<ExistingRecord>, ProviderFailure> {
        let url = format!("{BASE_URL}/dns/retrieveByNameType/{}", Self::name_type_path(target));
        let res: RetrieveResponse = self.request(&url, JsonValue::Null)?;

        Ok(res.records.into_iter().next().map(|rec| ExistingRecord {
            id: Some(match rec.id {
                JsonValue::String(id) => id,
                other => other.to_string(),
            }),
            content: rec.content,
            ttl: rec.ttl.and_then(|ttl| ttl.parse().ok()),
        }))
    }

    fn upsert_record(
        &self,
        target: &RecordTarget,
        value: &IpAddress,
        ttl: u32,
        known: KnownRecord<'_>,
    ) -> Result<(), ProviderFailure> {
        let time = Local::now().format("%a %b %-d %Y at %I:%M:%S %p");
        let notes = format!("Last updated by {} on {time}", clap::crate_name!());

        let exists = match known {
            KnownRecord::Present(_) => true,
            KnownRecord::Absent => false,
            KnownRecord::Unknown => self.query_record(target)?.is_some(),
        };

        if exists {
            let url = format!("{BASE_URL}/dns/editByNameType/{}", Self::name_type_path(target));
            let payload = json!({ "content": value.to_string(), "ttl": ttl.to_string(), "notes": notes });
            self.request::<JsonObject>(&url, payload)?;
        } else {
            let url = format!("{BASE_URL}/dns/create/{}", target.domain());
            let name = if target.is_apex() { "" } else { target.subdomain() };
            let payload = json!({
                "name": name,
                "type": target.record_type().as_str(),
                "content": value.to_string(),
                "ttl": ttl.to_string(),
                "notes": notes,
            });
            self.request::<JsonObject>(&url, payload)?;
        }

        Ok(())
    }
}

/// Interprets a Porkbun response body. All endpoints answer with an object carrying a `status` of `SUCCESS` or
/// `ERROR`; errors come with a `message`.
fn parse_response<R: DeserializeOwned>(status: u16, text: &str) -> Result<R, ProviderFailure> {
    let json: JsonValue = serde_json::from_str(text)
        .map_err(|err| ProviderFailure::Malformed(format!("Porkbun API invalid JSON ({err}): {text}")))?;

    match json {
        JsonValue::Object(mut map) if map.get_str("status") == Some("SUCCESS") => {
            map.remove("status");
            serde_json::from_value(JsonValue::Object(map))
                .map_err(|err| ProviderFailure::Malformed(format!("failed to parse JSON response: {err}")))
        },
        JsonValue::Object(map) if map.get_str("status") == Some("ERROR") => Err(ProviderFailure::Api {
            status: Some(status),
            code: None,
            message: map.get_str("message").unwrap_or("unknown error").to_string(),
        }),
        other => Err(ProviderFailure::Malformed(format!("unexpected response: {other}"))),
    }
}

trait JsonObjectExt {
    /// Combines [`JsonMap::get`] and [`JsonValue::as_str`] into one method that only returns the value if it both
    /// exists and is a string.
    fn get_str(&self, key: &str) -> Option<&str>;
}

impl JsonObjectExt for JsonObject {
    #[inline]
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(JsonValue::as_str)
    }
}

/// Response returned by Porkbun's `/retrieve` family of endpoints.
#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    records: Vec<Record>,
}

/// A single Porkbun DNS record. Porkbun sends numbers as strings, sometimes.
#[derive(Debug, Deserialize)]
struct Record {
    id: JsonValue,
    content: String,
    #[serde(default, deserialize_with = "stringly")]
    ttl: Option<String>,
}

fn stringly<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(d)? {
        Some(JsonValue::String(s)) if !s.is_empty() => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
