// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by rtest.

use camino::Utf8PathBuf;
use semver::Version;
use std::io;
use thiserror::Error;

/// An error that occurred while reading or parsing the rtest config file.
#[derive(Debug, Error)]
pub enum ConfigReadError {
    /// The config file could not be read.
    #[error("failed to read rtest config at `{path}`")]
    Read {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        err: io::Error,
    },

    /// The config file could not be deserialized.
    #[error("failed to parse rtest config at `{path}`")]
    Parse {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: toml::de::Error,
    },
}

/// A configured search glob failed to compile.
#[derive(Debug, Error)]
#[error("invalid search glob `{glob}` for {framework}")]
pub struct SearchGlobError {
    /// The framework the glob was configured for.
    pub framework: crate::discovery::TestFramework,

    /// The glob pattern.
    pub glob: String,

    /// The underlying error.
    #[source]
    pub err: globset::Error,
}

/// An error that occurred while locating test boundaries in an R source file.
///
/// Discovery errors are per-file: they annotate the file node and never abort
/// discovery of other files.
#[derive(Clone, Debug, Error)]
#[error("failed to parse tests from `{file}`: {message}")]
pub struct BoundaryParseError {
    /// The file that failed to parse.
    pub file: Utf8PathBuf,

    /// A human-readable description of the failure.
    pub message: String,
}

impl BoundaryParseError {
    pub(crate) fn new(file: impl Into<Utf8PathBuf>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
        }
    }
}

/// An error that occurred while resolving the `Rscript` interpreter or probing
/// the installed framework version.
#[derive(Debug, Error)]
pub enum InterpreterQueryError {
    /// No usable `Rscript` executable was found.
    #[error(
        "no usable Rscript executable found (candidates tried: {})",
        .candidates.iter().map(|p| format!("`{p}`")).collect::<Vec<_>>().join(", ")
    )]
    NotFound {
        /// The candidate paths that were probed.
        candidates: Vec<Utf8PathBuf>,
    },

    /// A version probe process failed to start.
    #[error("failed to execute `{program}`")]
    ProbeSpawn {
        /// The program that was invoked.
        program: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        err: io::Error,
    },

    /// A version probe ran but produced unusable output.
    #[error("`{program}` produced unusable version output: {output:?}")]
    ProbeOutput {
        /// The program that was invoked.
        program: Utf8PathBuf,

        /// The output that could not be understood.
        output: String,
    },

    /// A probed version string could not be parsed.
    #[error("could not parse version string {raw:?}")]
    VersionParse {
        /// The raw version string.
        raw: String,

        /// The underlying error.
        #[source]
        err: semver::Error,
    },
}

/// The installed test framework is older than the minimum rtest supports.
///
/// This is detected before any test process is spawned, so a run rejected with
/// this error has no partial state.
#[derive(Clone, Debug, Error)]
#[error(
    "devtools version too old: found {found}, rtest requires devtools>={minimum} \
     to be installed in the Rscript environment"
)]
pub struct VersionFloorError {
    /// The version that was found.
    pub found: Version,

    /// The minimum supported version.
    pub minimum: Version,
}

/// An error that occurred while starting the interpreter process.
#[derive(Debug, Error)]
#[error("error spawning `{program}`")]
pub struct ChildStartError {
    /// The program that failed to start.
    pub program: Utf8PathBuf,

    /// The error that occurred.
    #[source]
    pub err: io::Error,
}

/// An error that occurred while writing or removing a temporary script.
#[derive(Debug, Error)]
#[error("error writing temporary script under `{dir}`")]
pub struct TempScriptError {
    /// The directory the script was being created in.
    pub dir: Utf8PathBuf,

    /// The error that occurred.
    #[source]
    pub err: io::Error,
}

/// An error that terminated a test run, or one queued node of it.
///
/// The orchestrator isolates per-node failures to the affected subtree;
/// interpreter and version errors reject the rest of the queue as well.
#[derive(Debug, Error)]
pub enum RunError {
    /// The interpreter could not be resolved or probed.
    #[error("interpreter query failed")]
    Interpreter(#[from] InterpreterQueryError),

    /// The installed framework version is below the supported floor.
    #[error(transparent)]
    VersionFloor(#[from] VersionFloorError),

    /// The interpreter process could not be spawned.
    #[error(transparent)]
    ChildStart(#[from] ChildStartError),

    /// A debug session could not be started.
    #[error("failed to start debug session: {message}")]
    DebugStart {
        /// A description of the failure.
        message: String,
    },

    /// A temporary script could not be produced.
    #[error(transparent)]
    TempScript(#[from] TempScriptError),

    /// A test source file could not be read for scoping.
    #[error("failed to read test source `{path}`")]
    SourceRead {
        /// The file that could not be read.
        path: Utf8PathBuf,

        /// The error that occurred.
        #[source]
        err: io::Error,
    },

    /// No reporting shim is configured, so structured results cannot be
    /// produced.
    #[error("reporter shim path is not configured (set `reporter-path` in rtest.toml)")]
    ReporterShimNotConfigured,

    /// A structured event named a test that does not correspond to any known
    /// node. This indicates an id-encoding or protocol mismatch bug and is
    /// reported rather than swallowed.
    #[error("test with id `{id}` could not be found, please report this")]
    UnknownTestId {
        /// The identifier that could not be resolved.
        id: String,
    },

    /// The interpreter aborted fatally. Detected textually, and authoritative
    /// even when the transport reported a clean exit.
    #[error("execution halted:\n{output}")]
    ExecutionHalted {
        /// The accumulated run output.
        output: String,
    },

    /// The interpreter process exited unsuccessfully, or the transport
    /// reported an error.
    #[error("test process failed{}:\n{output}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    ChildFailed {
        /// The accumulated run output.
        output: String,

        /// Extra transport-level detail, if any.
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_floor_message_names_minimum() {
        let err = VersionFloorError {
            found: Version::new(2, 2, 0),
            minimum: Version::new(2, 3, 2),
        };
        let message = err.to_string();
        assert!(message.contains("2.3.2"), "message names the floor: {message}");
        assert!(message.contains("2.2.0"), "message names the found version: {message}");
    }

    #[test]
    fn unknown_test_id_is_reported_with_id() {
        let err = RunError::UnknownTestId {
            id: "test-email.R&does not exist".to_owned(),
        };
        assert!(err.to_string().contains("test-email.R&does not exist"));
    }
}
