// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use rtest_cli::RtestApp;

fn main() -> Result<()> {
    color_eyre::install()?;
    let app = RtestApp::parse();
    app.exec()
}
