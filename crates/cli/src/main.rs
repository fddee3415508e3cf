//! `keel` binary.
//!
//! Loads a component assembly, registers its components with a fresh runtime,
//! replays the scripted steps and prints what every component did along the way.

mod assembly;
mod cli;
mod recorder;
mod run;

use assembly::Assembly;
use clap::Parser;
use cli::{Cli, Command};
use keel_scr::{ScrConfig, render_text};
use run::Report;

fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	match cli.command {
		Command::Run { assembly, config, json } => {
			let config = match &config {
				Some(path) => ScrConfig::load(path)?,
				None => ScrConfig::default(),
			};
			setup_tracing(cli.verbose, &config.log_level);
			let assembly = Assembly::load(&assembly)?;
			let report = run::run(&assembly, config)?;
			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				print!("{}", render_report(&report));
			}
		}
		Command::Check { assembly: path } => {
			setup_tracing(cli.verbose, "warn");
			let count = run::check(&Assembly::load(&path)?)?;
			println!("{}: {count} component(s) ok", path.display());
		}
	}
	Ok(())
}

fn render_report(report: &Report) -> String {
	let mut out = String::new();
	for (index, step) in report.steps.iter().enumerate() {
		out.push_str(&format!("[{index}] {}\n", step.step));
		for event in &step.events {
			out.push_str(&format!("    {event}\n"));
		}
		if let Some(status) = &step.status {
			out.push_str(&render_text(status));
		}
	}
	out.push_str("\nFinal status:\n");
	out.push_str(&render_text(&report.status));
	out
}

fn setup_tracing(verbose: bool, default_level: &str) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("KEEL_LOG").unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("keel_cli=debug,keel_scr=debug,keel_registry=debug,keel_worker=debug,info")
		} else {
			EnvFilter::new(default_level)
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
