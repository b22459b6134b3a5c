use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

use eyre::{WrapErr, eyre};
use serde::Deserialize;

use crate::address::AddressFamily;
use crate::provider::ProviderKind;
use crate::reconcile::{FailurePolicy, ReconcileOptions};
use crate::records::{RecordSource, RecordTarget};
use crate::retry::RetryPolicy;
use crate::workflow::Settings;


// [FIXME] Serde does not support literals as default values yet: https://github.com/serde-rs/serde/issues/368
#[rustfmt::skip] const fn bool<const X: bool>() -> bool { X }
#[rustfmt::skip] const fn num<const X: u32>() -> u32 { X }
#[rustfmt::skip] const fn ipv6() -> AddressFamily { AddressFamily::Ipv6 }

// Internal struct for command-line flags: **not** the main program configuration. The main configuration comes from
// `Config`, which is loaded from a TOML file.
#[derive(Debug, clap::Parser)]
#[command(version, about, max_term_width = 100)]
pub struct Args {
    /// Path to TOML file containing the provider and records to update.
    #[arg(short, long, env = "DDNS_CONFIG", value_name = "FILE", default_value = "ddns.toml")]
    pub config: PathBuf,

    /// Path to a JSON file listing the records to update.
    ///
    /// The file must contain an array of objects with 'sub', 'domain', and 'type' fields. When given, this replaces
    /// whatever records the config file lists.
    #[arg(short, long, env = "DDNS_RECORDS", value_name = "FILE")]
    pub records: Option<PathBuf>,

    /// Skip creating or modifying any DNS records.
    ///
    /// When this option is enabled, the current IP address will be fetched and the records that need to be updated
    /// will be printed, but no changes will actually be made.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Controls the verbosity of logs.
    ///
    /// Possible log levels are 'error', 'warn', 'info', 'debug', and 'trace' (in that order).
    #[arg(long, env = "DDNS_LOG_LEVEL", value_name = "LEVEL", default_value = "info")]
    pub log_level: log::LevelFilter,

    /// File that log lines are appended to, in addition to standard output.
    #[arg(long, env = "DDNS_LOG_FILE", value_name = "FILE", default_value = "ddns.log")]
    pub log_file: PathBuf,

    /// Publish this machine's IPv4 address, regardless of the 'family' setting in the config file.
    #[arg(long, conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Publish this machine's IPv6 address, regardless of the 'family' setting in the config file.
    #[arg(long)]
    pub ipv6: bool,

    /// Keep updating the remaining records after one fails, instead of stopping at the first failure.
    #[arg(long)]
    pub keep_going: bool,
}

/// Main program configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Fetch addresses and determine which records to update, but don't actually update.
    #[serde(default = "bool::<false>", skip)] // Not set by serde; passed through from CLI args
    pub dry_run: bool,

    /// Which DNS provider's API the records live in.
    pub provider: ProviderKind,

    /// Which address family to publish.
    #[serde(default = "ipv6")]
    pub family: AddressFamily,

    /// IP-echo endpoint to ask for the current address. Defaults to ip.sb's endpoint for the chosen family.
    pub ip_endpoint: Option<String>,

    /// JSON file listing the records to update. Takes precedence over inline `records`.
    pub records_file: Option<PathBuf>,

    /// Records to update, written directly in the config file.
    #[serde(default)]
    pub records: Vec<RecordTarget>,

    /// Look each record up before writing it, and skip the write when it is already correct.
    #[serde(default = "bool::<true>")]
    pub query_before_write: bool,

    /// Stop at the first record that fails to update.
    #[serde(default = "bool::<true>")]
    pub fail_fast: bool,

    #[serde(default = "num::<600>")]
    pub ttl: u32,

    /// How many times to try each request (the first attempt included) before giving up.
    #[serde(default = "num::<3>")]
    pub attempts: u32,

    /// Seconds to wait between attempts.
    #[serde(default = "num::<0>")]
    pub retry_delay_secs: u32,

    /// Seconds to wait for any single HTTP request.
    #[serde(default = "num::<10>")]
    pub timeout_secs: u32,
}

impl Config {
    /// Loads runtime configuration from command line arguments and configuration file.
    pub fn from_args(args: &Args) -> eyre::Result<Self> {
        log::trace!("Reading configuration from {}", args.config.display());

        let text = std::fs::read_to_string(&args.config)
            .wrap_err_with(|| format!("Failed to read config file {}", args.config.display()))?;
        let mut config = Self::parse(&text)?;

        config.extend_from_args(args);
        config.validate().wrap_err("Invalid configuration")?;

        Ok(config)
    }

    fn parse(text: &str) -> eyre::Result<Self> {
        toml::from_str(text).wrap_err("Failed to parse config file")
    }

    /// Copies over non-TOML settings from the command line into this [`Config`] struct.
    fn extend_from_args(&mut self, args: &Args) {
        self.dry_run = args.dry_run;

        if args.ipv4 {
            self.family = AddressFamily::Ipv4;
        } else if args.ipv6 {
            self.family = AddressFamily::Ipv6;
        }

        if let Some(records) = &args.records {
            self.records_file = Some(records.clone());
        }

        if args.keep_going {
            self.fail_fast = false;
        }
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.records_file.is_none() && self.records.is_empty() {
            return Err(eyre!("No records configured: set 'records_file', add [[records]], or pass --records"));
        }

        if self.attempts == 0 {
            return Err(eyre!("'attempts' must be at least 1"));
        }

        // Check that all inline records are unique (`@` and an empty subdomain both name the apex):
        let mut labels = HashMap::with_capacity(self.records.len());
        for (i, record) in self.records.iter().enumerate() {
            let i = i + 1;
            match labels.entry((record.fqdn(), record.record_type().clone())) {
                Entry::Vacant(entry) => {
                    entry.insert(i);
                },
                Entry::Occupied(entry) => {
                    let j = *entry.get();
                    return Err(eyre!("Record {record} specified more than once (records {j} and {i})"));
                },
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.into())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let attempts = NonZeroU32::new(self.attempts).unwrap_or(NonZeroU32::MIN);
        RetryPolicy::new(attempts, Duration::from_secs(self.retry_delay_secs.into()))
    }

    pub fn record_source(&self) -> RecordSource {
        match &self.records_file {
            Some(path) => RecordSource::File(path.clone()),
            None => RecordSource::Fixed(self.records.clone()),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            ttl: self.ttl,
            query_before_write: self.query_before_write,
            retry: self.retry_policy(),
            dry_run: self.dry_run,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            family: self.family,
            records: self.record_source(),
            failure_policy: if self.fail_fast { FailurePolicy::FailFast } else { FailurePolicy::KeepGoing },
            resolve_retry: self.retry_policy(),
        }
    }
}


#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ddns-updater").chain(extra.iter().copied())).unwrap()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            provider = "alidns"

            [[records]]
            sub = "laptop"
            domain = "awsl.xin"
            type = "AAAA"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::AliDns);
        assert_eq!(config.family, AddressFamily::Ipv6);
        assert!(config.query_before_write);
        assert!(config.fail_fast);
        assert_eq!(config.ttl, 600);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.record_source(), RecordSource::Fixed(vec![RecordTarget::new("laptop", "awsl.xin", "AAAA")]));
        config.validate().unwrap();
    }

    #[test]
    fn cli_overrides_file() {
        let mut config = Config::parse(
            r#"
            provider = "porkbun"
            family = "ipv6"
            records_file = "/etc/ddns/records.json"
            "#,
        )
        .unwrap();

        config.extend_from_args(&args(&["--ipv4", "--keep-going", "-n", "--records", "other.json"]));

        assert_eq!(config.family, AddressFamily::Ipv4);
        assert!(config.dry_run);
        assert_eq!(config.settings().failure_policy, FailurePolicy::KeepGoing);
        assert_eq!(config.record_source(), RecordSource::File("other.json".into()));
        assert!(config.reconcile_options().dry_run);
    }

    #[test]
    fn conflicting_family_flags_rejected() {
        assert!(Args::try_parse_from(["ddns-updater", "--ipv4", "--ipv6"]).is_err());
    }

    #[test]
    fn needs_some_records() {
        let config = Config::parse(r#"provider = "alidns""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_inline_records_rejected() {
        let config = Config::parse(
            r#"
            provider = "alidns"
            records = [
                { sub = "laptop", domain = "awsl.xin", type = "AAAA" },
                { sub = "qbit", domain = "awsl.xin", type = "AAAA" },
                { sub = "laptop", domain = "awsl.xin", type = "AAAA" },
            ]
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Record laptop.awsl.xin/AAAA specified more than once (records 1 and 3)");
    }

    #[test]
    fn apex_spellings_are_the_same_record() {
        let config = Config::parse(
            r#"
            provider = "porkbun"
            records = [
                { sub = "@", domain = "awsl.xin", type = "A" },
                { sub = "", domain = "awsl.xin", type = "a" },
            ]
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Record awsl.xin/A specified more than once (records 1 and 2)");
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = Config::parse(
            r#"
            provider = "alidns"
            records_file = "records.json"
            attempts = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(Config::parse(r#"provider = "route53""#).is_err());
    }
}
