use clap::{Parser, Subcommand};
use vanopticon_loki::{config, run};

#[derive(Parser)]
#[command(name = "loki", about = "Loki - HTTP mock and relay host")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Parse, expand and validate a listener config file, then exit
	Check {
		/// Path to the config file (plain JSON or comment-tolerant .jsonmc)
		#[arg(long)]
		file: String,
	},
	/// Run the listener fleet (default)
	Run,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Check { file } => {
			let raw = match std::fs::read_to_string(&file) {
				Ok(r) => r,
				Err(e) => {
					eprintln!("{}: {}", file, e);
					std::process::exit(2);
				}
			};
			match config::loader::parse_entries(Some(&file), &raw) {
				Ok(entries) => {
					let problems = config::loader::validate_entries(&entries);
					if problems.is_empty() {
						println!("{}: {} listener definition(s) OK", file, entries.len());
					} else {
						for p in &problems {
							eprintln!("{}", p);
						}
						std::process::exit(1);
					}
				}
				Err(e) => {
					eprintln!("{}: {}", file, e);
					std::process::exit(1);
				}
			}
		}
		Commands::Run => {
			run().await;
		}
	}
}
