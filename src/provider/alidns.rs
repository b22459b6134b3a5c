use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha1::Sha1;

use super::{
    DnsProvider, ExistingRecord, KnownRecord, ProviderErrorKind, ProviderFailure, classify_provider_error, credential,
};
use crate::address::IpAddress;
use crate::records::RecordTarget;

const ENDPOINT: &str = "https://alidns.aliyuncs.com/";
const API_VERSION: &str = "2015-01-09";

/// Client for Alibaba Cloud DNS's RPC-style API.
///
/// Every request is a GET whose query string is signed with HMAC-SHA1 over the sorted, percent-encoded parameters
/// (signature version 1.0).
pub struct AliDns {
    client: Client,
    endpoint: String,
    access_key_id: String,
    access_key_secret: String,
}

impl std::fmt::Debug for AliDns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliDns")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

impl AliDns {
    pub fn new(client: Client, access_key_id: String, access_key_secret: String) -> Self {
        Self {
            client,
            endpoint: ENDPOINT.to_string(),
            access_key_id,
            access_key_secret,
        }
    }

    /// Creates a client using the `ACCESSKEY_ID` and `ACCESSKEY_SECRET` environment variables.
    pub fn from_env(client: Client) -> eyre::Result<Self> {
        Ok(Self::new(client, credential("ACCESSKEY_ID")?, credential("ACCESSKEY_SECRET")?))
    }

    /// Finds the record matching `target` exactly (same RR and type).
    fn find_record(&self, target: &RecordTarget) -> Result<Option<Record>, ProviderFailure> {
        let res: DescribeResponse = self.call("DescribeSubDomainRecords", [
            ("SubDomain", target.fqdn()),
            ("DomainName", target.domain().to_string()),
            ("Type", target.record_type().to_string()),
        ])?;

        Ok(pick_record(target, res.domain_records.record))
    }

    /// Calls an API action and parses its JSON response.
    fn call<R, const N: usize>(&self, action: &str, params: [(&str, String); N]) -> Result<R, ProviderFailure>
    where
        R: DeserializeOwned,
    {
        let mut all = BTreeMap::from(params.map(|(k, v)| (k.to_string(), v)));
        all.insert("Action".into(), action.into());
        all.insert("Format".into(), "JSON".into());
        all.insert("Version".into(), API_VERSION.into());
        all.insert("AccessKeyId".into(), self.access_key_id.clone());
        all.insert("SignatureMethod".into(), "HMAC-SHA1".into());
        all.insert("SignatureVersion".into(), "1.0".into());
        all.insert("SignatureNonce".into(), format!("{:016x}", rand::random::<u64>()));
        all.insert("Timestamp".into(), Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());

        let query = canonical_query(&all);
        let signature = sign(&self.access_key_secret, &string_to_sign(&query));
        let url = format!("{}?{query}&Signature={}", self.endpoint, percent_encode(&signature));

        log::trace!("AliDNS {action}");

        let res = self.client.get(url).send().map_err(|err| ProviderFailure::Transport(err.to_string()))?;
        let status = res.status();
        let text = res.text().map_err(|err| ProviderFailure::Transport(err.to_string()))?;

        if !status.is_success() {
            return Err(api_failure(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|err| ProviderFailure::Malformed(format!("{err}: {text}")))
    }
}

impl DnsProvider for AliDns {
    fn name(&self) -> &'static str {
        "alidns"
    }

    fn query_record(&self, target: &RecordTarget) -> Result<Option<ExistingRecord>, ProviderFailure> {
        Ok(self.find_record(target)?.map(|rec| ExistingRecord {
            id: Some(rec.record_id),
            content: rec.value,
            ttl: rec.ttl,
        }))
    }

    fn upsert_record(
        &self,
        target: &RecordTarget,
        value: &IpAddress,
        ttl: u32,
        known: KnownRecord<'_>,
    ) -> Result<(), ProviderFailure> {
        let rr = rr(target).to_string();
        let typ = target.record_type().to_string();

        let res: RecordIdResponse = match known_record_id(known, || self.find_record(target))? {
            Some(record_id) => self.call("UpdateDomainRecord", [
                ("RecordId", record_id),
                ("RR", rr),
                ("Type", typ),
                ("Value", value.to_string()),
                ("TTL", ttl.to_string()),
            ])?,
            None => self.call("AddDomainRecord", [
                ("DomainName", target.domain().to_string()),
                ("RR", rr),
                ("Type", typ),
                ("Value", value.to_string()),
                ("TTL", ttl.to_string()),
            ])?,
        };

        log::debug!("AliDNS record {} now holds {value}", res.record_id);
        Ok(())
    }

    fn classify(&self, failure: &ProviderFailure) -> ProviderErrorKind {
        classify_alidns_error(failure)
    }
}

/// Classifies by AliDNS's structured error code, falling back to message matching when there is no code.
pub fn classify_alidns_error(failure: &ProviderFailure) -> ProviderErrorKind {
    let Some(code) = failure.code() else {
        return classify_provider_error(failure);
    };

    match code {
        "DomainRecordDuplicate" => ProviderErrorKind::AlreadyExists,
        "InternalError" | "UnknownError" => ProviderErrorKind::Transient,
        c if c.starts_with("Throttling") || c.starts_with("ServiceUnavailable") => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Permanent,
    }
}

/// The id of the record an upsert should update, or `None` if it has to be created. Only looks the record up when the
/// caller's lookup did not already settle it.
fn known_record_id<F>(known: KnownRecord<'_>, find: F) -> Result<Option<String>, ProviderFailure>
where
    F: FnOnce() -> Result<Option<Record>, ProviderFailure>,
{
    match known {
        KnownRecord::Absent => Ok(None),
        KnownRecord::Present(ExistingRecord { id: Some(id), .. }) => Ok(Some(id.clone())),
        KnownRecord::Present(_) | KnownRecord::Unknown => Ok(find()?.map(|rec| rec.record_id)),
    }
}

/// The RR (host record) AliDNS uses for a target; the apex is `@`.
fn rr(target: &RecordTarget) -> &str {
    if target.is_apex() { "@" } else { target.subdomain() }
}

fn pick_record(target: &RecordTarget, records: Vec<Record>) -> Option<Record> {
    let rr = rr(target);
    let typ = target.record_type().as_str();
    records
        .into_iter()
        .find(|rec| rec.rr == rr && rec.typ.eq_ignore_ascii_case(typ))
}

/// Turns a non-success response into a failure, pulling out the error code if the body has one.
fn api_failure(status: u16, body: &str) -> ProviderFailure {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => ProviderFailure::Api {
            status: Some(status),
            code: Some(err.code),
            message: err.message,
        },
        Err(_) => ProviderFailure::Api {
            status: Some(status),
            code: None,
            message: body.trim().to_string(),
        },
    }
}

/// Percent-encodes a string the way the signature algorithm expects: everything but RFC 3986 unreserved characters
/// is encoded, with uppercase hex digits.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => {
                let _ = write!(out, "%{b:02X}");
            },
        }
    }
    out
}

/// Joins already-sorted parameters into `k=v&k=v`, encoding both keys and values.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn string_to_sign(canonical_query: &str) -> String {
    format!("GET&{}&{}", percent_encode("/"), percent_encode(canonical_query))
}

fn sign(secret: &str, string_to_sign: &str) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(format!("{secret}&").as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(string_to_sign.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeResponse {
    domain_records: DomainRecords,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<Record>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Record {
    record_id: String,
    #[serde(rename = "RR")]
    rr: String,
    #[serde(rename = "Type")]
    typ: String,
    value: String,
    #[serde(rename = "TTL")]
    ttl: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordIdResponse {
    record_id: String,
}
