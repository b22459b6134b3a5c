use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use chrono::Local;
use log::{Level, LevelFilter, Log};
#[cfg(all(unix, feature = "journald"))]
use systemd_journal_logger::{JournalLog, connected_to_journal, current_exe_identifier};

/// A simple logger that writes messages to `stdout` and appends them to a log file.
///
/// Colour support on the console is automatically provided by the [`anstream`] crate; the log file never gets colour
/// codes, and always gets timestamps.
pub struct Logger {
    filter: LevelFilter,
    timestamps: bool,
    file: Option<Mutex<File>>,
    #[cfg(all(unix, feature = "journald"))]
    journald: Option<JournalLog>,
}

/// Timestamp format for log output. Format is `Jul 08 2001 14:46:23`.
static TIMESTAMP_FMT: LazyLock<&'static [chrono::format::Item<'static>]> = LazyLock::new(|| {
    chrono::format::StrftimeItems::new("%b %d %Y %H:%M:%S")
        .parse_to_owned()
        .expect("hardcoded strftime string should be valid")
        .leak()
});

/// Level styles, borrowed from systemd so that console output looks like `journalctl`'s.
#[rustfmt::skip]
mod styles {
    use anstyle::{Ansi256Color, AnsiColor, Color, Style};

    pub const TRACE: Style = Style::new().fg_color(Some(Color::Ansi256(Ansi256Color(245))));  // `ANSI_GREY`
    pub const DEBUG: Style = Style::new().fg_color(None);
    pub const INFO: Style  = Style::new().fg_color(None).bold();                               // `ANSI_HIGHLIGHT`
    pub const WARN: Style  = Style::new().fg_color(Some(Color::Ansi256(Ansi256Color(185)))).bold();
    pub const ERROR: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))).bold(); // `ANSI_HIGHLIGHT_RED`
}

impl Logger {
    /// Creates a new logger instance, appending to `log_file` (created if missing).
    ///
    /// Failing to open the log file is not fatal; the error is handed back so it can be reported once the logger is
    /// running.
    pub fn new(level: LevelFilter, log_file: &Path) -> (Self, Option<io::Error>) {
        // Default for timestamps is enabled, but they can be disabled by setting an environment variable.
        let mut timestamps = true;
        if crate::get_var("DDNS_LOG_NO_TIMESTAMPS").is_ok_and(|v| !v.is_empty()) {
            timestamps = false;
        }

        // If `journald` connects successfully, we don't need to print our own timestamps.
        #[cfg(all(unix, feature = "journald"))]
        let journald = init_journald().inspect(|_| timestamps = false);

        let (file, file_err) = match OpenOptions::new().create(true).append(true).open(log_file) {
            Ok(file) => (Some(Mutex::new(file)), None),
            Err(err) => (None, Some(err)),
        };

        let logger = Self {
            filter: level,
            timestamps,
            file,
            #[cfg(all(unix, feature = "journald"))]
            journald,
        };

        (logger, file_err)
    }

    /// Initializes this logger.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        let level = self.filter;
        log::set_boxed_logger(Box::new(self)).map(|_| log::set_max_level(level))
    }

    /// Fallible version of [`Log::log`], writing to standard output.
    fn try_log(&self, record: &log::Record) -> io::Result<()> {
        // `anstream`'s versions of `stdout` will automatically handle terminal/VT configuration and NO_COLOR support.
        self.emit(record, &mut anstream::stdout().lock())
    }

    /// Writes one record to the log file and to `console` (or journald, when connected).
    ///
    /// The console always gets the line, even when the file write fails; the file error is returned afterwards.
    fn emit(&self, record: &log::Record, console: &mut impl Write) -> io::Result<()> {
        // Only log our own messages; hide implementation details (reqwest also has logging)
        if !record.target().starts_with(env!("CARGO_CRATE_NAME")) {
            return Ok(());
        }

        if !self.enabled(record.metadata()) {
            return Ok(());
        }

        #[rustfmt::skip]
        let (style, tag) = match record.level() {
            Level::Trace => (styles::TRACE, "[trace]"),
            Level::Debug => (styles::DEBUG, "[debug]"),
            Level::Info  => ( styles::INFO, "[info]"),
            Level::Warn  => ( styles::WARN, "[warn]"),
            Level::Error => (styles::ERROR, "[error]"),
        };

        let timestamp = Local::now().format_with_items(TIMESTAMP_FMT.iter()).to_string();

        let file_res = match self.file.as_ref() {
            Some(file) => {
                // A poisoned lock only means another thread panicked mid-write; the file itself is still usable.
                let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                writeln!(file, "{timestamp} {tag} {}", record.args())
            },
            None => Ok(()),
        };

        // With a journald connection, the journal replaces console output (the log file is still written).
        #[cfg(all(unix, feature = "journald"))]
        if let Some(journald) = self.journald.as_ref() {
            return journald.journal_send(record).and(file_res);
        }

        if self.timestamps {
            write!(console, "{timestamp} ")?;
        }

        writeln!(console, "{style}{tag} {}{style:#}", record.args())?;
        console.flush()?;
        file_res
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &log::Record) {
        let _ = self.try_log(record);
    }

    fn flush(&self) {
        let _ = anstream::stdout().flush();

        if let Some(file) = self.file.as_ref() {
            let _ = file.lock().map(|mut file| file.flush());
        }

        #[cfg(all(unix, feature = "journald"))]
        if let Some(journald) = self.journald.as_ref() {
            <JournalLog as Log>::flush(journald);
        }
    }
}

#[cfg(all(unix, feature = "journald"))]
fn init_journald() -> Option<JournalLog> {
    if connected_to_journal() {
        let identifier = current_exe_identifier().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let logger = JournalLog::empty()
            .ok()?
            .with_syslog_identifier(identifier)
            .add_extra_field("version", env!("CARGO_PKG_VERSION"));
        Some(logger)
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn appends_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ddns.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        let (logger, err) = Logger::new(LevelFilter::Info, &path);
        assert!(err.is_none());

        let emit = |level: Level, target: &str, msg: &str| {
            logger.log(&log::Record::builder().args(format_args!("{msg}")).level(level).target(target).build());
        };

        emit(Level::Info, env!("CARGO_CRATE_NAME"), "Got IPv6 address: 2001:db8::1");
        emit(Level::Debug, env!("CARGO_CRATE_NAME"), "noise");
        emit(Level::Info, "reqwest::connect", "reqwest internals");
        logger.flush();

        let mut text = String::new();
        File::open(&path).unwrap().read_to_string(&mut text).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2, "{text}");
        assert_eq!(lines[0], "earlier line");
        assert!(lines[1].ends_with(" [info] Got IPv6 address: 2001:db8::1"), "{}", lines[1]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_file_write_still_reaches_console() {
        // Opening `/dev/full` works; every write to it fails with ENOSPC.
        let (logger, err) = Logger::new(LevelFilter::Info, Path::new("/dev/full"));
        assert!(err.is_none());

        let mut console = Vec::new();
        let res = logger.emit(
            &log::Record::builder()
                .args(format_args!("Got IPv6 address: 2001:db8::1"))
                .level(Level::Info)
                .target(env!("CARGO_CRATE_NAME"))
                .build(),
            &mut console,
        );

        assert!(res.is_err());
        assert!(String::from_utf8_lossy(&console).contains("[info] Got IPv6 address: 2001:db8::1"));
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (_logger, err) = Logger::new(LevelFilter::Info, &dir.path().join("missing").join("ddns.log"));
        assert!(err.is_some());
    }
}
