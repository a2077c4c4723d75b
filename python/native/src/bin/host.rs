//! Standalone host for running an entry module without a simulator
//!
//! Goes through the same lifecycle a simulator would: init, run the entry
//! point, deliver events, then shut down twice as a host teardown does.

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use simbridge::{init, notify_event, run_entry_point, shutdown};
use simbridge_core::config::ENTRY_MODULE_VAR;
use simbridge_core::{ArgumentVector, RunStatus};

#[derive(Parser)]
#[command(name = "simbridge-host")]
#[command(about = "Run a simbridge entry module in an embedded interpreter", long_about = None)]
struct Cli {
    /// Loader module to import (overrides SIMBRIDGE_ENTRY_MODULE)
    #[arg(long)]
    entry_module: Option<String>,

    /// Event message to deliver after the entry point returns; repeatable
    #[arg(long = "event", value_name = "MSG")]
    events: Vec<String>,

    /// Arguments passed to the entry point after the program name
    #[arg(last = true)]
    args: Vec<OsString>,
}

#[cfg(unix)]
fn to_bytes(arg: OsString) -> Vec<u8> {
    use std::os::unix::ffi::OsStringExt;
    arg.into_vec()
}

#[cfg(not(unix))]
fn to_bytes(arg: OsString) -> Vec<u8> {
    arg.to_string_lossy().into_owned().into_bytes()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(module) = &cli.entry_module {
        std::env::set_var(ENTRY_MODULE_VAR, module);
    }

    let program = std::env::args_os()
        .next()
        .unwrap_or_else(|| OsString::from("simbridge-host"));
    let argv: ArgumentVector = std::iter::once(program)
        .chain(cli.args)
        .map(to_bytes)
        .collect();

    init();
    let status = run_entry_point(&argv);
    for event in &cli.events {
        notify_event(Some(event.as_str()));
    }
    shutdown();
    shutdown();

    match status {
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Started | RunStatus::AlreadyRunning => ExitCode::SUCCESS,
    }
}
