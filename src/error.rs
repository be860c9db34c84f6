/*!
The failure conditions that abort a measurement, a print or a transform.

Everything in this crate returns `anyhow::Result`, and these errors ride
inside of an `anyhow::Error`. They exist as a distinct type so that callers
(and tests) can tell the different fatal conditions apart with
`anyhow::Error::downcast_ref`. None of them are ever retried.
*/

use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A timed or profiled invocation exited with a status other than the one
    /// declared for the benchmark. `actual` is `None` when the process was
    /// killed by a signal.
    ExitCodeMismatch { command: String, expected: i32, actual: Option<i32> },
    /// The profiler's report has no usable line attributing sampled time to
    /// the measured binary.
    ProfilerParseFailure { binary: String, reason: String },
    /// A translated run wrote something other than what the native run with
    /// the same index wrote to standard output.
    OutputMismatch { binary: String, run: usize },
    /// A persisted row (or header) does not have the shape implied by the
    /// store's schema.
    MalformedStoreRow { line: u64, reason: String },
    /// Conflicting or missing options, e.g., projecting onto a mode that the
    /// store does not contain.
    Configuration(String),
    /// The binary for a program variant does not exist.
    BinaryNotFound(PathBuf),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(Error::Configuration(msg.into()))
    }

    pub(crate) fn malformed(
        line: u64,
        reason: impl Into<String>,
    ) -> anyhow::Error {
        anyhow::Error::new(Error::MalformedStoreRow {
            line,
            reason: reason.into(),
        })
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::ExitCodeMismatch { ref command, expected, actual } => {
                match actual {
                    Some(rc) => write!(
                        f,
                        "command exited with {} but {} was expected: {}",
                        rc, expected, command,
                    ),
                    None => write!(
                        f,
                        "command was terminated by a signal but exit code \
                         {} was expected: {}",
                        expected, command,
                    ),
                }
            }
            Error::ProfilerParseFailure { ref binary, ref reason } => {
                write!(f, "bad profiler report for '{}': {}", binary, reason)
            }
            Error::OutputMismatch { ref binary, run } => write!(
                f,
                "output of '{}' differs from native (run #{})",
                binary, run,
            ),
            Error::MalformedStoreRow { line, ref reason } => {
                write!(f, "malformed store row at line {}: {}", line, reason)
            }
            Error::Configuration(ref msg) => {
                write!(f, "configuration error: {}", msg)
            }
            Error::BinaryNotFound(ref path) => {
                write!(f, "binary not found: {}", path.display())
            }
        }
    }
}
