// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter configuration.
//!
//! A small TOML surface: interpreter path override, per-framework search
//! globs, the reporting-shim location and the minimum supported devtools
//! version. Everything has a sensible default; a missing config file is not
//! an error.

use crate::{discovery::TestFramework, errors::ConfigReadError};
use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use serde::Deserialize;

/// Glob matching testthat test files.
pub const TESTTHAT_GLOB: &str = "**/tests/testthat/**/test*.R";
/// Glob excluding `R CMD check` working copies from testthat discovery.
pub const TESTTHAT_EXCLUDE_GLOB: &str = "**/check/*.Rcheck/**";
/// Glob matching tinytest test files.
pub const TINYTEST_GLOB: &str = "**/inst/tinytest/**/test*.R";

fn default_min_devtools() -> Version {
    Version::new(2, 3, 2)
}

fn default_testthat_glob() -> String {
    TESTTHAT_GLOB.to_owned()
}

fn default_testthat_exclude() -> String {
    TESTTHAT_EXCLUDE_GLOB.to_owned()
}

fn default_tinytest_glob() -> String {
    TINYTEST_GLOB.to_owned()
}

/// Configuration consumed by the runner core.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AdapterConfig {
    /// Explicit path to the `Rscript` executable. When unset, the interpreter
    /// locator probes `PATH` and platform-conventional locations.
    #[serde(default)]
    pub rscript_path: Option<Utf8PathBuf>,

    /// Path to the R package implementing the JSON reporting shim.
    #[serde(default)]
    pub reporter_path: Option<Utf8PathBuf>,

    /// Minimum supported devtools version. Runs are rejected before any
    /// process spawn when the installed version is below this floor.
    #[serde(default = "default_min_devtools")]
    pub min_devtools_version: Version,

    /// Search glob for testthat test files.
    #[serde(default = "default_testthat_glob")]
    pub testthat_glob: String,

    /// Exclusion glob applied to testthat discovery.
    #[serde(default = "default_testthat_exclude")]
    pub testthat_exclude: String,

    /// Search glob for tinytest test files.
    #[serde(default = "default_tinytest_glob")]
    pub tinytest_glob: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rscript_path: None,
            reporter_path: None,
            min_devtools_version: default_min_devtools(),
            testthat_glob: default_testthat_glob(),
            testthat_exclude: default_testthat_exclude(),
            tinytest_glob: default_tinytest_glob(),
        }
    }
}

impl AdapterConfig {
    /// Reads the config from `path`.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigReadError> {
        let contents = std::fs::read_to_string(path).map_err(|err| ConfigReadError::Read {
            path: path.to_owned(),
            err,
        })?;
        toml::from_str(&contents).map_err(|err| ConfigReadError::Parse {
            path: path.to_owned(),
            err,
        })
    }

    /// The search glob for `framework`.
    pub fn glob_for(&self, framework: TestFramework) -> &str {
        match framework {
            TestFramework::Testthat => &self.testthat_glob,
            TestFramework::Tinytest => &self.tinytest_glob,
        }
    }

    /// The exclusion glob for `framework`, if any.
    pub fn exclude_for(&self, framework: TestFramework) -> Option<&str> {
        match framework {
            TestFramework::Testthat => Some(&self.testthat_exclude),
            TestFramework::Tinytest => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.min_devtools_version, Version::new(2, 3, 2));
        assert_eq!(config.glob_for(TestFramework::Testthat), TESTTHAT_GLOB);
        assert_eq!(config.glob_for(TestFramework::Tinytest), TINYTEST_GLOB);
        assert!(config.rscript_path.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let config: AdapterConfig = toml::from_str(indoc! {r#"
            rscript-path = "/opt/R/bin/Rscript"
            min-devtools-version = "2.4.0"
        "#})
        .expect("config parses");
        assert_eq!(
            config.rscript_path.as_deref(),
            Some(Utf8Path::new("/opt/R/bin/Rscript"))
        );
        assert_eq!(config.min_devtools_version, Version::new(2, 4, 0));
        // Unspecified fields keep their defaults.
        assert_eq!(config.testthat_exclude, TESTTHAT_EXCLUDE_GLOB);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = toml::from_str::<AdapterConfig>("no-such-option = true").unwrap_err();
        assert!(err.to_string().contains("no-such-option"));
    }
}
