use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize colored, timestamped logging to stdout.
pub fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
	let level = level
		.unwrap_or("info")
		.parse::<LevelFilter>()
		.unwrap_or(LevelFilter::Info);

	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::BrightBlack)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}] {}: {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		// Outbound HTTP internals are noisy at debug.
		.level_for("hyper", LevelFilter::Info)
		.level_for("reqwest", LevelFilter::Info)
		.level_for("rustls", LevelFilter::Info)
		.chain(std::io::stdout())
		.apply()?;
	Ok(())
}
