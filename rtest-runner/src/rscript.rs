// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating the `Rscript` interpreter and probing the installed devtools
//! version.
//!
//! Both values are resolved once per context and cached for the life of the
//! process; one shared context is injected into the orchestrator so
//! subsequent runs skip the discovery probes.

use crate::errors::InterpreterQueryError;
use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use tokio::{process::Command, sync::OnceCell};
use tracing::debug;

/// Shared interpreter state: the resolved `Rscript` path and the probed
/// devtools version.
#[derive(Debug, Default)]
pub struct InterpreterContext {
    override_path: Option<Utf8PathBuf>,
    path: OnceCell<Utf8PathBuf>,
    devtools: OnceCell<Version>,
}

impl InterpreterContext {
    /// Creates a context. An explicit `override_path` is used as-is, without
    /// probing.
    pub fn new(override_path: Option<Utf8PathBuf>) -> Self {
        Self {
            override_path,
            path: OnceCell::new(),
            devtools: OnceCell::new(),
        }
    }

    /// Resolves the `Rscript` executable, probing candidates on first use.
    pub async fn rscript_path(&self) -> Result<&Utf8Path, InterpreterQueryError> {
        if let Some(path) = &self.override_path {
            return Ok(path);
        }
        self.path
            .get_or_try_init(|| async {
                let candidates = candidate_paths();
                for candidate in &candidates {
                    if probe(candidate).await {
                        debug!("resolved Rscript to {candidate}");
                        return Ok(candidate.clone());
                    }
                }
                Err(InterpreterQueryError::NotFound { candidates })
            })
            .await
            .map(Utf8PathBuf::as_path)
    }

    /// Probes the installed devtools version, once per context.
    pub async fn devtools_version(&self) -> Result<&Version, InterpreterQueryError> {
        let rscript = self.rscript_path().await?.to_owned();
        self.devtools
            .get_or_try_init(|| async move {
                let output = Command::new(&rscript)
                    .arg("-e")
                    .arg("cat(format(utils::packageVersion('devtools')))")
                    .output()
                    .await
                    .map_err(|err| InterpreterQueryError::ProbeSpawn {
                        program: rscript.clone(),
                        err,
                    })?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let raw = stdout.split_whitespace().last().unwrap_or("").to_owned();
                if raw.is_empty() {
                    return Err(InterpreterQueryError::ProbeOutput {
                        program: rscript.clone(),
                        output: stdout.into_owned(),
                    });
                }
                let version = parse_r_version(&raw)?;
                debug!("resolved devtools version to {version}");
                Ok(version)
            })
            .await
    }
}

/// Parses an R package version string. R versions may have two, three or four
/// dot-separated components (`2.4`, `2.4.5`, `1.1.8.9000`); they are folded
/// into semver's three.
pub(crate) fn parse_r_version(raw: &str) -> Result<Version, InterpreterQueryError> {
    let parts: Vec<&str> = raw.split(['.', '-']).collect();
    let normalized = match parts.len() {
        0 => raw.to_owned(),
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => parts[..3].join("."),
    };
    Version::parse(&normalized).map_err(|err| InterpreterQueryError::VersionParse {
        raw: raw.to_owned(),
        err,
    })
}

async fn probe(candidate: &Utf8Path) -> bool {
    match Command::new(candidate).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

fn candidate_paths() -> Vec<Utf8PathBuf> {
    let mut candidates = vec![Utf8PathBuf::from("Rscript")];
    candidates.extend(platform_candidates());
    candidates
}

#[cfg(unix)]
fn platform_candidates() -> Vec<Utf8PathBuf> {
    [
        "/usr/bin/Rscript",
        "/usr/local/bin/Rscript",
        "/opt/homebrew/bin/Rscript",
        "/Library/Frameworks/R.framework/Resources/bin/Rscript",
    ]
    .into_iter()
    .map(Utf8PathBuf::from)
    .collect()
}

#[cfg(windows)]
fn platform_candidates() -> Vec<Utf8PathBuf> {
    // Versioned install directories, newest first.
    let mut candidates = Vec::new();
    for base in ["C:/Program Files/R", "C:/Program Files (x86)/R"] {
        let Ok(entries) = std::fs::read_dir(base) else {
            continue;
        };
        let mut versions: Vec<Utf8PathBuf> = entries
            .flatten()
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
            .collect();
        versions.sort();
        versions.reverse();
        candidates.extend(
            versions
                .into_iter()
                .map(|dir| dir.join("bin/Rscript.exe")),
        );
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("2.4.5", Version::new(2, 4, 5); "three components")]
    #[test_case("2.4", Version::new(2, 4, 0); "two components")]
    #[test_case("1.1.8.9000", Version::new(1, 1, 8); "four components folded")]
    fn r_version_parsing(raw: &str, expected: Version) {
        assert_eq!(parse_r_version(raw).expect("parses"), expected);
    }

    #[test]
    fn r_version_garbage_is_an_error() {
        let err = parse_r_version("not-a-version").unwrap_err();
        assert!(matches!(err, InterpreterQueryError::VersionParse { .. }));
    }

    #[tokio::test]
    async fn override_path_is_used_without_probing() {
        let context =
            InterpreterContext::new(Some(Utf8PathBuf::from("/custom/bin/Rscript")));
        let path = context.rscript_path().await.expect("override accepted");
        assert_eq!(path, Utf8Path::new("/custom/bin/Rscript"));
    }
}
