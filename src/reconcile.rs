//! Bringing provider-side records in line with the current address.

use std::fmt::{self, Display};

use crate::address::IpAddress;
use crate::provider::{DnsProvider, ExistingRecord, KnownRecord, ProviderError, ProviderErrorKind, ProviderFailure};
use crate::records::RecordTarget;
use crate::retry::{self, GaveUp, RetryPolicy};

/// TTL given to records we write: ten minutes.
pub const DEFAULT_TTL: u32 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub ttl: u32,
    /// Look the record up first and skip the write when it already holds the desired address.
    pub query_before_write: bool,
    pub retry: RetryPolicy,
    /// Never write anything; report what would have been written instead.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            query_before_write: true,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }
}

/// What to do with the rest of a batch once one target has failed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failed target.
    #[default]
    FailFast,
    /// Carry on with the remaining targets.
    KeepGoing,
}

/// A provider call that was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: ProviderError,
    pub attempts: u32,
}

/// The result of reconciling one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record was written.
    Updated,
    /// The record already held the desired address; nothing was written.
    AlreadyCurrent,
    /// The provider refused the write because the record is already there as requested.
    AlreadyExists,
    /// Dry run: the record would have been written.
    WouldUpdate,
    Failed(Failure),
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ReconcileOutcome::Failed(_))
    }
}

impl Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Updated => f.write_str("updated"),
            ReconcileOutcome::AlreadyCurrent => f.write_str("already current"),
            ReconcileOutcome::AlreadyExists => f.write_str("already exists"),
            ReconcileOutcome::WouldUpdate => f.write_str("would update"),
            ReconcileOutcome::Failed(failure) => {
                let n = failure.attempts;
                write!(f, "failed after {n} attempt{}: {}", if n == 1 { "" } else { "s" }, failure.error)
            },
        }
    }
}

/// Per-target outcomes of a batch, in the order the targets were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub outcomes: Vec<(RecordTarget, ReconcileOutcome)>,
    /// Targets never attempted because an earlier one failed under [`FailurePolicy::FailFast`].
    pub skipped: Vec<RecordTarget>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
    }

    pub fn count(&self, pred: impl Fn(&ReconcileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| pred(outcome)).count()
    }

    pub fn outcome(&self, target: &RecordTarget) -> Option<&ReconcileOutcome> {
        self.outcomes.iter().find(|(t, _)| t == target).map(|(_, outcome)| outcome)
    }
}

/// One-line summary, e.g. `2 updated, 1 already current, 0 failed`.
impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let updated = self.count(|o| matches!(o, ReconcileOutcome::Updated));
        let current = self.count(|o| matches!(o, ReconcileOutcome::AlreadyCurrent | ReconcileOutcome::AlreadyExists));
        let dry = self.count(|o| matches!(o, ReconcileOutcome::WouldUpdate));
        let failed = self.count(|o| !o.is_success());

        write!(f, "{updated} updated, {current} already current, ")?;
        if dry > 0 {
            write!(f, "{dry} would update, ")?;
        }
        write!(f, "{failed} failed")?;
        if !self.skipped.is_empty() {
            write!(f, ", {} skipped", self.skipped.len())?;
        }
        Ok(())
    }
}

/// Applies the desired address to records through a [`DnsProvider`].
#[derive(Debug)]
pub struct Reconciler<P> {
    provider: P,
    options: ReconcileOptions,
}

impl<P: DnsProvider> Reconciler<P> {
    pub fn new(provider: P, options: ReconcileOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Makes sure `target` holds `desired`, retrying transient provider failures within the attempt budget.
    ///
    /// Once a record has converged, calling this again writes nothing (provided the provider can be queried and
    /// `query_before_write` is on).
    pub fn reconcile(&self, target: &RecordTarget, desired: &IpAddress) -> ReconcileOutcome {
        if let Some(family) = target.record_type().family()
            && family != desired.family()
        {
            log::warn!("[{target}] record holds {family} addresses, but the address being published is {desired}");
        }

        let label = format!("[{target}]");
        let transient = |err: &ProviderError| err.kind == ProviderErrorKind::Transient;

        match retry::run(&self.options.retry, &label, transient, |_| self.attempt(target, desired)) {
            Ok(outcome) => outcome,
            Err(GaveUp { error, attempts }) => ReconcileOutcome::Failed(Failure { error, attempts }),
        }
    }

    /// Reconciles every target in order. Under [`FailurePolicy::FailFast`], the first failure stops the batch and the
    /// remaining targets are reported as skipped.
    pub fn reconcile_all(&self, targets: &[RecordTarget], desired: &IpAddress, policy: FailurePolicy) -> Report {
        let mut report = Report::default();

        for (i, target) in targets.iter().enumerate() {
            let outcome = self.reconcile(target, desired);
            match &outcome {
                ReconcileOutcome::Failed(_) => log::error!("[{target}] {outcome}"),
                _ => log::info!("[{target}] {outcome}"),
            }

            let failed = !outcome.is_success();
            report.outcomes.push((target.clone(), outcome));

            if failed && policy == FailurePolicy::FailFast {
                report.skipped = targets[i + 1..].to_vec();
                if !report.skipped.is_empty() {
                    log::error!("Aborting: {} remaining record(s) not attempted", report.skipped.len());
                }
                break;
            }
        }

        report
    }

    /// A single query-then-write attempt.
    fn attempt(&self, target: &RecordTarget, desired: &IpAddress) -> Result<ReconcileOutcome, ProviderError> {
        // `None` until the provider has been asked; then whatever it answered.
        let mut lookup: Option<Option<ExistingRecord>> = None;

        if self.options.query_before_write && self.provider.supports_query() {
            match self.provider.query_record(target) {
                Ok(Some(existing)) if desired.matches_content(&existing.content) => {
                    log::debug!("[{target}] already holds {}", existing.content);
                    return Ok(ReconcileOutcome::AlreadyCurrent);
                },
                Ok(Some(existing)) => {
                    log::info!("[{target}] currently holds {}, changing to {desired}", existing.content);
                    lookup = Some(Some(existing));
                },
                Ok(None) => {
                    log::info!("[{target}] no existing record");
                    lookup = Some(None);
                },
                Err(failure) => return self.absorb(target, failure),
            }
        }

        if self.options.dry_run {
            log::info!("[{target}] (DRY RUN) skipped writing {desired}");
            return Ok(ReconcileOutcome::WouldUpdate);
        }

        let known = match &lookup {
            Some(found) => KnownRecord::from(found.as_ref()),
            None => KnownRecord::Unknown,
        };

        match self.provider.upsert_record(target, desired, self.options.ttl, known) {
            Ok(()) => Ok(ReconcileOutcome::Updated),
            Err(failure) => self.absorb(target, failure),
        }
    }

    /// Classifies a failure; "already exists" is success, anything else goes back to the retry loop.
    fn absorb(&self, target: &RecordTarget, failure: ProviderFailure) -> Result<ReconcileOutcome, ProviderError> {
        let kind = self.provider.classify(&failure);
        if kind == ProviderErrorKind::AlreadyExists {
            log::info!("[{target}] {} reports the record already exists: {failure}", self.provider.name());
            return Ok(ReconcileOutcome::AlreadyExists);
        }
        Err(ProviderError { kind, failure })
    }
}
