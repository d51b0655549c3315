// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Style};
use rtest_runner::{
    list::NodeId,
    reporter::{OutputLocation, RunReporter},
    runner::RunStats,
};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, Args)]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        value_name = "WHEN",
        global = true
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_ansi(self.color.should_colorize())
            .with_writer(std::io::stderr)
            .init();
        OutputContext {
            color: self.color.should_colorize(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Always => f.write_str("always"),
            Self::Never => f.write_str("never"),
        }
    }
}

impl Color {
    fn should_colorize(self) -> bool {
        match self {
            Color::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct OutputContext {
    pub(crate) color: bool,
}

/// Styles for per-test status lines, in the manner of a terminal test
/// reporter.
#[derive(Clone, Debug)]
struct Styles {
    pass: Style,
    fail: Style,
    skip: Style,
    dim: Style,
}

impl Styles {
    fn new(color: bool) -> Self {
        if color {
            Self {
                pass: Style::new().green().bold(),
                fail: Style::new().red().bold(),
                skip: Style::new().yellow().bold(),
                dim: Style::new().dimmed(),
            }
        } else {
            Self {
                pass: Style::new(),
                fail: Style::new(),
                skip: Style::new(),
                dim: Style::new(),
            }
        }
    }
}

/// Prints node transitions and run output to the console.
pub(crate) struct ConsoleReporter {
    styles: Styles,
    echo_output: bool,
}

impl ConsoleReporter {
    pub(crate) fn new(context: OutputContext, echo_output: bool) -> Self {
        Self {
            styles: Styles::new(context.color),
            echo_output,
        }
    }

    fn status_line(&self, status: &str, style: Style, node: &NodeId, duration: Option<Duration>) {
        match duration {
            Some(duration) => println!(
                "{:>12} [{:>8.3}s] {}",
                status.style(style),
                duration.as_secs_f64(),
                node
            ),
            None => println!("{:>12} {}", status.style(style), node),
        }
    }
}

impl RunReporter for ConsoleReporter {
    fn run_started(&mut self, _run_id: Uuid, requested: &[NodeId]) {
        println!(
            "{:>12} {} node(s)",
            "Starting".style(self.styles.pass),
            requested.len()
        );
    }

    fn node_started(&mut self, node: &NodeId) {
        if self.echo_output {
            println!("{:>12} {}", "START".style(self.styles.dim), node);
        }
    }

    fn node_passed(&mut self, node: &NodeId, duration: Option<Duration>) {
        self.status_line("PASS", self.styles.pass, node, duration);
    }

    fn node_failed(&mut self, node: &NodeId, message: &str, duration: Option<Duration>) {
        self.status_line("FAIL", self.styles.fail, node, duration);
        if !message.is_empty() {
            println!("{}", message.style(self.styles.fail));
        }
    }

    fn node_skipped(&mut self, node: &NodeId, message: Option<&str>) {
        self.status_line("SKIP", self.styles.skip, node, None);
        if let Some(message) = message {
            println!("{}", message.style(self.styles.dim));
        }
    }

    fn node_errored(&mut self, node: &NodeId, message: &str, duration: Option<Duration>) {
        self.status_line("ERROR", self.styles.fail, node, duration);
        if !message.is_empty() {
            println!("{}", message.style(self.styles.fail));
        }
    }

    fn append_output(
        &mut self,
        text: &str,
        location: Option<&OutputLocation>,
        _node: Option<&NodeId>,
    ) {
        if !self.echo_output {
            return;
        }
        match location {
            Some(location) => println!(
                "{} {}",
                format!("{}:{}:", location.file, location.line).style(self.styles.dim),
                text
            ),
            None => println!("{}", text.style(self.styles.dim)),
        }
    }

    fn warning(&mut self, message: &str) {
        eprintln!("{:>12} {message}", "warning".style(self.styles.skip));
    }

    fn error(&mut self, message: &str) {
        eprintln!("{:>12} {message}", "error".style(self.styles.fail));
    }
}

pub(crate) fn print_summary(stats: RunStats, duration: Duration, context: OutputContext) {
    let styles = Styles::new(context.color);
    let status = if stats.failed > 0 || stats.errored > 0 {
        "FAILED".style(styles.fail)
    } else {
        "PASSED".style(styles.pass)
    };
    println!(
        "{:>12} [{:>8.3}s] {} tests run: {} passed, {} failed, {} skipped, {} errored: {}",
        "Summary".style(styles.dim),
        duration.as_secs_f64(),
        stats.total(),
        stats.passed,
        stats.failed,
        stats.skipped,
        stats.errored,
        status,
    );
}
