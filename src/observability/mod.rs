//! Logging bootstrap for binaries and test harnesses.
//!
//! Library code logs through the `log` facade only; installing the logger
//! is the embedding program's decision.

use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};

/// Initialize colored stderr logging at `level` ("info", "debug", ...).
/// Safe to call once per process; a second call returns an error.
pub fn init_logging(level: &str) -> Result<()> {
	let level = level.parse::<log::LevelFilter>().unwrap_or(log::LevelFilter::Info);
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::BrightBlack)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}] {} {}",
				chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		.chain(std::io::stderr())
		.apply()?;

	Ok(())
}
