use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "Run component assemblies against an in-process component runtime")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Verbose logging (overridden by KEEL_LOG)
	#[arg(short, long, global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Register the assembly's components, replay its steps and print snapshots
	Run {
		/// Assembly file
		#[arg(value_name = "ASSEMBLY")]
		assembly: PathBuf,

		/// Runtime configuration file
		#[arg(short, long, value_name = "PATH")]
		config: Option<PathBuf>,

		/// Print the report as JSON
		#[arg(long)]
		json: bool,
	},
	/// Validate the assembly's component declarations without activating anything
	Check {
		/// Assembly file
		#[arg(value_name = "ASSEMBLY")]
		assembly: PathBuf,
	},
}
