// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{ConsoleReporter, OutputContext, OutputOpts, print_summary};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr, eyre};
use rtest_runner::{
    config::AdapterConfig,
    list::{NodeId, NodeKind, TestNode},
    runner::{RunOrchestrator, RunRequest},
};
use tokio::runtime::Runtime;

/// A test runner for R's testthat and tinytest frameworks.
#[derive(Debug, Parser)]
#[command(version, bin_name = "rtest")]
pub struct RtestApp {
    /// Workspace root to discover tests under [default: current directory]
    #[arg(long, global = true, value_name = "PATH")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/rtest.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Path to the R reporting-shim package, overriding the config
    #[arg(long, global = true, value_name = "PATH")]
    reporter_path: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List discovered tests
    ///
    /// Walks the workspace for testthat and tinytest files and parses their
    /// declarations. Use --message-format json for machine-readable output.
    List {
        /// Output format
        #[arg(
            short = 'T',
            long,
            value_enum,
            default_value_t,
            value_name = "FMT"
        )]
        message_format: MessageFormat,
    },
    /// Run tests
    ///
    /// Runs the named nodes, or everything that was discovered when no
    /// identifier is given. Node identifiers are the ones `rtest list`
    /// prints.
    Run {
        /// Node identifiers to run
        #[arg(value_name = "ID")]
        include: Vec<String>,

        /// Node identifiers to exclude, subtrees included
        #[arg(long, short = 'E', value_name = "ID")]
        exclude: Vec<String>,
    },
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormat {
    #[default]
    Human,
    Json,
}

impl std::fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Human => f.write_str("human"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl RtestApp {
    /// Executes the app.
    pub fn exec(self) -> Result<()> {
        let context = self.output.init();
        let workspace_root = match self.workspace_root {
            Some(root) => root,
            None => Utf8PathBuf::try_from(std::env::current_dir()?)
                .wrap_err("current directory is not valid UTF-8")?,
        };

        let config_file = self
            .config_file
            .unwrap_or_else(|| workspace_root.join("rtest.toml"));
        let mut config = if config_file.exists() {
            AdapterConfig::from_file(&config_file)
                .wrap_err_with(|| format!("reading config from `{config_file}`"))?
        } else {
            AdapterConfig::default()
        };
        if let Some(reporter_path) = self.reporter_path {
            config.reporter_path = Some(reporter_path);
        }

        match self.command {
            Command::List { message_format } => {
                exec_list(config, workspace_root, context, message_format)
            }
            Command::Run { include, exclude } => {
                exec_run(config, workspace_root, context, include, exclude)
            }
        }
    }
}

fn exec_list(
    config: AdapterConfig,
    workspace_root: Utf8PathBuf,
    context: OutputContext,
    message_format: MessageFormat,
) -> Result<()> {
    let reporter = ConsoleReporter::new(context, false);
    let mut orchestrator = RunOrchestrator::new(config, workspace_root, reporter);
    orchestrator.load()?;
    orchestrator.resolve_all();

    match message_format {
        MessageFormat::Human => {
            for root in &orchestrator.tree.roots {
                print_node(root, 0);
            }
        }
        MessageFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.tree)?);
        }
    }
    Ok(())
}

fn print_node(node: &TestNode, depth: usize) {
    let marker = match node.kind {
        NodeKind::Package => "package",
        NodeKind::File { .. } => "file",
        NodeKind::Suite => "suite",
        NodeKind::Test => "test",
    };
    println!("{:indent$}{marker}: {}", "", node.id, indent = depth * 2);
    if let Some(error) = &node.error {
        println!("{:indent$}  (discovery error: {error})", "", indent = depth * 2);
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn exec_run(
    config: AdapterConfig,
    workspace_root: Utf8PathBuf,
    context: OutputContext,
    include: Vec<String>,
    exclude: Vec<String>,
) -> Result<()> {
    let reporter = ConsoleReporter::new(context, true);
    let mut orchestrator = RunOrchestrator::new(config, workspace_root, reporter);
    orchestrator.load()?;

    orchestrator.resolve_all();

    // Check identifiers up front so a typo is a CLI error rather than a
    // silently empty run.
    for raw in include.iter().chain(&exclude) {
        if orchestrator.tree.find(&node_id(raw)).is_none() {
            return Err(eyre!("`{raw}` does not name a discovered node"));
        }
    }

    let request = RunRequest {
        include: include.iter().map(|raw| node_id(raw)).collect(),
        exclude: exclude.iter().map(|raw| node_id(raw)).collect(),
        mode: rtest_runner::entry_point::RunMode::Normal,
    };

    let runtime = Runtime::new().wrap_err("building a Tokio runtime")?;
    let summary = runtime.block_on(async {
        let cancel = orchestrator.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        orchestrator.run(request).await
    });

    match summary {
        Some(summary) => {
            print_summary(summary.stats, summary.duration, context);
            if summary.stats.failed > 0 || summary.stats.errored > 0 {
                std::process::exit(100);
            }
            Ok(())
        }
        None => Err(eyre!("a run is already in progress")),
    }
}

fn node_id(raw: &str) -> NodeId {
    NodeId::from_encoded(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        RtestApp::command().debug_assert();
    }
}
