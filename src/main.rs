use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use palisade::store::HistoryFilter;
use palisade::{Blacklist, EntryKind, check, check_batch, config, observability};

#[derive(Parser)]
#[command(
	name = "palisade",
	about = "Palisade - blacklist index over threat-intelligence indicators"
)]
struct Cli {
	/// Override the database path (also PAL_DB_PATH)
	#[arg(long, env = "PAL_DB_PATH")]
	db: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Check a single domain, URL, or IP against the blacklist
	Check {
		value: String,
		/// Output in JSON format
		#[arg(long)]
		json: bool,
	},
	/// Check every non-empty line of a file
	Batch {
		file: PathBuf,
		/// Output in JSON format
		#[arg(long)]
		json: bool,
	},
	/// Add one entry to the blacklist
	Add {
		#[arg(value_enum)]
		kind: KindArg,
		value: String,
		/// Source feed the entry is attributed to
		#[arg(long)]
		source: String,
		#[arg(long, default_value_t = 8.0)]
		score: f64,
		/// Entry date; defaults to today (UTC)
		#[arg(long)]
		date: Option<String>,
	},
	/// Remove an entry by value from every table
	Remove { value: String },
	/// Show entry counts, active sources, and last updates
	Status {
		/// Output in JSON format
		#[arg(long)]
		json: bool,
	},
	/// Print random blacklist entries for quick tests
	Sample {
		#[arg(short = 'n', long, default_value_t = 10)]
		count: usize,
	},
	/// Show the update audit history
	History {
		#[arg(long)]
		source: Option<String>,
		/// Lower timestamp bound (inclusive)
		#[arg(long)]
		start: Option<String>,
		/// Upper timestamp bound (inclusive)
		#[arg(long)]
		end: Option<String>,
	},
	/// Rebuild the in-memory index from the durable store
	Reload,
	/// Print query-path metrics
	Metrics {
		/// Emit Prometheus text format instead of JSON
		#[arg(long)]
		prometheus: bool,
	},
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
	Domain,
	Url,
	Ip,
}

impl From<KindArg> for EntryKind {
	fn from(kind: KindArg) -> Self {
		match kind {
			KindArg::Domain => EntryKind::Domain,
			KindArg::Url => EntryKind::Url,
			KindArg::Ip => EntryKind::Ip,
		}
	}
}

fn print_verdict(value: &str, result: &Result<palisade::Verdict, palisade::IndexError>) {
	match result {
		Ok(verdict) => {
			let status = if verdict.blacklisted { "Blacklisted" } else { "Safe" };
			println!("{value}: {status} ({})", verdict.explanation);
		}
		Err(e) => println!("{value}: {e}"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let mut settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load config: {e}");
			config::Settings::default()
		}
	};
	if let Err(e) = observability::init_logging(settings.log_level.as_deref().unwrap_or("info")) {
		eprintln!("warning: failed to initialize logging: {e}");
	}
	if let Some(db) = cli.db {
		settings.db_path = db;
	}

	let index = Blacklist::open(&settings).await?;

	match cli.command {
		Commands::Check { value, json } => {
			let result = check(&index, &value).await;
			if json {
				match &result {
					Ok(verdict) => println!("{}", serde_json::to_string(verdict)?),
					Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
				}
			} else {
				print_verdict(&value, &result);
			}
		}
		Commands::Batch { file, json } => {
			let content = std::fs::read_to_string(&file)?;
			let values: Vec<String> = content
				.lines()
				.map(str::trim)
				.filter(|line| !line.is_empty())
				.map(str::to_string)
				.collect();
			let results = check_batch(&index, &values).await;
			if json {
				let rendered: Vec<serde_json::Value> = results
					.iter()
					.map(|result| match result {
						Ok(verdict) => serde_json::to_value(verdict).unwrap_or_default(),
						Err(e) => serde_json::json!({ "error": e.to_string() }),
					})
					.collect();
				println!("{}", serde_json::to_string_pretty(&rendered)?);
			} else {
				for (value, result) in values.iter().zip(results.iter()) {
					print_verdict(value, result);
				}
			}
		}
		Commands::Add {
			kind,
			value,
			source,
			score,
			date,
		} => {
			let date =
				date.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());
			match EntryKind::from(kind) {
				EntryKind::Domain => index.add_domain(&value, &date, score, &source).await?,
				EntryKind::Url => index.add_url(&value, &date, score, &source).await?,
				EntryKind::Ip => index.add_ip(&value, &date, score, &source).await?,
			}
			index.log_update(&source, 1).await?;
			println!("Added {value} from {source}");
		}
		Commands::Remove { value } => {
			if index.remove(&value).await? {
				println!("Removed {value}");
			} else {
				println!("No entry found for {value}");
			}
		}
		Commands::Status { json } => {
			let status = index.status().await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&status)?);
			} else {
				println!("Total entries: {}", status.entry_count);
				println!("Active sources:");
				for source in &status.active_sources {
					match status.last_update_per_source.get(source) {
						Some(last) => println!("  - {source} (last update {last})"),
						None => println!("  - {source}"),
					}
				}
			}
		}
		Commands::Sample { count } => {
			for value in index.sample(count).await {
				println!("{value}");
			}
		}
		Commands::History { source, start, end } => {
			let filter = HistoryFilter { source, start, end };
			for record in index.update_history(&filter).await? {
				println!(
					"{} {} ({} entries)",
					record.timestamp, record.source, record.entry_count
				);
			}
		}
		Commands::Reload => {
			index.reload().await?;
			println!("Reloaded {} entries", index.count_entries().await);
		}
		Commands::Metrics { prometheus } => {
			let snapshot = index.metrics().await;
			if prometheus {
				print!("{}", snapshot.to_prometheus_text());
			} else {
				println!("{}", serde_json::to_string_pretty(&snapshot)?);
			}
		}
	}

	Ok(())
}
