//! One complete update run: resolve the address, load the records, reconcile each of them.

use std::fmt::{self, Display};
use std::process::ExitCode;

use crate::address::AddressFamily;
use crate::provider::DnsProvider;
use crate::reconcile::{FailurePolicy, Reconciler, Report};
use crate::records::{LoadError, RecordSource};
use crate::resolver::{AddressSource, ResolutionError};
use crate::retry::{self, GaveUp, RetryPolicy};

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct Settings {
    pub family: AddressFamily,
    pub records: RecordSource,
    pub failure_policy: FailurePolicy,
    /// Attempt budget for resolving the address.
    pub resolve_retry: RetryPolicy,
}

/// Failures that end a run before any record is touched.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("could not determine the current address after {attempts} attempt(s)")]
    Resolution {
        #[source]
        source: ResolutionError,
        attempts: u32,
    },

    #[error("could not load the record list")]
    Load(#[from] LoadError),
}

pub fn run<S, P>(source: &S, reconciler: &Reconciler<P>, settings: &Settings) -> Result<Report, WorkflowError>
where
    S: AddressSource + ?Sized,
    P: DnsProvider,
{
    let family = settings.family;
    log::info!("Fetching current {family} address...");

    let addr = retry::run(&settings.resolve_retry, "resolve address", ResolutionError::is_retryable, |_| {
        source.resolve(family)
    })
    .map_err(|GaveUp { error, attempts }| WorkflowError::Resolution { source: error, attempts })?;
    log::info!("Got {family} address: {addr}");

    let targets = settings.records.load()?;
    if targets.is_empty() {
        log::warn!("No records to update");
    } else {
        log::debug!("Loaded {} record(s)", targets.len());
    }

    let report = reconciler.reconcile_all(&targets, &addr, settings.failure_policy);
    log::info!("Reconciled {} of {} record(s): {report}", report.outcomes.len(), targets.len());
    Ok(report)
}

/// How a run ended, as far as the process exit status and the last log line are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conclusion {
    /// Every record is where it should be.
    Done,
    FinishedWithErrors,
}

impl Conclusion {
    /// A run is only done if it got as far as reconciling and every record came out fine.
    pub fn of<E>(result: &Result<Report, E>) -> Self {
        match result {
            Ok(report) if report.is_success() => Conclusion::Done,
            _ => Conclusion::FinishedWithErrors,
        }
    }

    pub fn is_success(self) -> bool {
        self == Conclusion::Done
    }

    /// Writes the terminal log line.
    pub fn log(self) {
        match self {
            Conclusion::Done => log::info!("{self}"),
            Conclusion::FinishedWithErrors => log::error!("{self}"),
        }
    }
}

impl Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Conclusion::Done => "Done!",
            Conclusion::FinishedWithErrors => "Finished with errors.",
        })
    }
}

impl From<Conclusion> for ExitCode {
    fn from(conclusion: Conclusion) -> Self {
        if conclusion.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
    }
}


#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Write;

    use super::*;
    use crate::address::IpAddress;
    use crate::reconcile::tests::{FakeProvider, permanent};
    use crate::reconcile::{ReconcileOptions, ReconcileOutcome};
    use crate::records::RecordTarget;
    use crate::resolver::parse_echo_response;

    /// Answers every request with the same canned IP-echo body, optionally after some network failures.
    struct CannedEcho {
        body: &'static str,
        outages: Cell<u32>,
        calls: Cell<u32>,
    }

    impl CannedEcho {
        fn new(body: &'static str) -> Self {
            Self {
                body,
                outages: Cell::new(0),
                calls: Cell::new(0),
            }
        }
    }

    impl AddressSource for CannedEcho {
        fn resolve(&self, family: AddressFamily) -> Result<IpAddress, ResolutionError> {
            self.calls.set(self.calls.get() + 1);
            if self.outages.get() > 0 {
                self.outages.set(self.outages.get() - 1);
                return Err(ResolutionError::Network {
                    url: "https://echo.test/".into(),
                    message: "connection refused".into(),
                });
            }
            parse_echo_response(self.body, family)
        }
    }

    fn settings(records: RecordSource) -> Settings {
        Settings {
            family: AddressFamily::Ipv6,
            records,
            failure_policy: FailurePolicy::FailFast,
            resolve_retry: RetryPolicy::default(),
        }
    }

    fn two_targets() -> Vec<RecordTarget> {
        vec![RecordTarget::new("laptop", "awsl.xin", "AAAA"), RecordTarget::new("qbit", "awsl.xin", "AAAA")]
    }

    #[test]
    fn end_to_end_two_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"sub":"laptop","domain":"awsl.xin","type":"AAAA"}},{{"sub":"qbit","domain":"awsl.xin","type":"AAAA"}}]"#
        )
        .unwrap();

        let echo = CannedEcho::new(r#"{"ip":"2001:db8::1"}"#);
        let reconciler = Reconciler::new(FakeProvider::default(), ReconcileOptions::default());

        let report = run(&echo, &reconciler, &settings(RecordSource::File(file.path().to_path_buf()))).unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.iter().all(|(_, o)| *o == ReconcileOutcome::Updated));
        assert_eq!(report.outcomes[0].0, two_targets()[0]);
        assert_eq!(report.outcomes[1].0, two_targets()[1]);
        assert!(report.is_success());
        assert_eq!(report.to_string(), "2 updated, 0 already current, 0 failed");
        assert_eq!(reconciler.provider().records.borrow()["qbit.awsl.xin/AAAA"], "2001:db8::1");

        let conclusion = Conclusion::of(&Ok::<_, WorkflowError>(report));
        assert_eq!(conclusion, Conclusion::Done);
        assert_eq!(conclusion.to_string(), "Done!");
        assert_eq!(ExitCode::from(conclusion), ExitCode::SUCCESS);
    }

    #[test]
    fn failures_conclude_with_errors() {
        let echo = CannedEcho::new(r#"{"ip":"2001:db8::1"}"#);
        let reconciler = Reconciler::new(FakeProvider::failing_upserts([permanent()]), ReconcileOptions::default());

        let failed = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets())));
        assert_eq!(Conclusion::of(&failed), Conclusion::FinishedWithErrors);

        echo.outages.set(3);
        let unresolved = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets())));
        let conclusion = Conclusion::of(&unresolved);
        assert_eq!(conclusion.to_string(), "Finished with errors.");
        assert_eq!(ExitCode::from(conclusion), ExitCode::FAILURE);
    }

    #[test]
    fn resolution_outages_are_retried() {
        let echo = CannedEcho::new(r#"{"ip":"2001:db8::1"}"#);
        echo.outages.set(2);
        let reconciler = Reconciler::new(FakeProvider::default(), ReconcileOptions::default());

        let report = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets()))).unwrap();
        assert!(report.is_success());
        assert_eq!(echo.calls.get(), 3);
    }

    #[test]
    fn resolution_exhaustion_is_fatal() {
        let echo = CannedEcho::new(r#"{"ip":"2001:db8::1"}"#);
        echo.outages.set(3);
        let reconciler = Reconciler::new(FakeProvider::default(), ReconcileOptions::default());

        let err = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets()))).unwrap_err();
        assert!(matches!(err, WorkflowError::Resolution { attempts: 3, .. }));
        assert_eq!(reconciler.provider().upserts.get(), 0);
    }

    #[test]
    fn family_mismatch_is_fatal_without_retry() {
        let echo = CannedEcho::new(r#"{"ip":"198.51.100.20"}"#);
        let reconciler = Reconciler::new(FakeProvider::default(), ReconcileOptions::default());

        let err = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets()))).unwrap_err();
        let WorkflowError::Resolution { source, attempts } = err else {
            panic!("expected resolution error");
        };
        assert!(matches!(source, ResolutionError::FamilyMismatch(_)));
        assert_eq!(attempts, 1);
        assert_eq!(echo.calls.get(), 1);
    }

    #[test]
    fn unreadable_record_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let echo = CannedEcho::new(r#"{"ip":"2001:db8::1"}"#);
        let reconciler = Reconciler::new(FakeProvider::default(), ReconcileOptions::default());

        let err = run(&echo, &reconciler, &settings(RecordSource::File(dir.path().join("none.json")))).unwrap_err();
        assert!(matches!(err, WorkflowError::Load(LoadError::NotFound(_))));
    }

    #[test]
    fn hard_failure_aborts_batch() {
        let echo = CannedEcho::new("2001:db8::1\n");
        let reconciler = Reconciler::new(FakeProvider::failing_upserts([permanent()]), ReconcileOptions::default());

        let report = run(&echo, &reconciler, &settings(RecordSource::Fixed(two_targets()))).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.skipped.len(), 1);
    }
}
