#![windows_subsystem = "windows"]

mod activity_gate;
mod bootstrap;
mod data_loaders;
mod error;
mod fetcher;
mod image_classifier;
mod link_manager;
mod logging;
mod pipeline;
mod platform;
mod scheduler;
mod signal_bus;
mod sinks;
mod slots;
mod utility;

use std::process::ExitCode;

use clap::Parser;

use crate::{
	activity_gate::{ActivityGate, DisplayPower},
	data_loaders::config::{ConfigStore, KEY_BASE_PATH, KEY_IMAGE_URL},
	error::{SwitcherError, SwitcherResult},
	fetcher::Fetcher,
	pipeline::PreparePipeline,
	scheduler::{Scheduler, SchedulerContext},
	signal_bus::{ServiceLock, SignalBus, SignalKind},
	sinks::{Launcher, ShellLauncher},
	slots::{SlotId, SlotManager},
	utility::{config_file_path, log_file_path},
};

pub const APP_NAME: &str = "WallpaperSwitcher";
pub const DEBUG_NAME: &str = "SWITCHER";

/// Periodically replaces the desktop wallpaper with a freshly downloaded image.
///
/// Without flags the program runs as the background service. Launching it
/// again while the service runs asks the service to switch now.
#[derive(Parser, Debug)]
#[command(name = "wallpaper-switcher", version)]
struct Cli {
	/// Print the configuration, or change one value with KEY=VALUE
	#[arg(short, long, value_name = "KEY=VALUE", num_args = 0..=1, default_missing_value = "")]
	config: Option<String>,

	/// Ask the running service to switch now
	#[arg(short, long, conflicts_with_all = ["config", "quit", "signal"])]
	switch: bool,

	/// Ask the running service to exit
	#[arg(short, long, conflicts_with_all = ["config", "signal"])]
	quit: bool,

	/// Send another command to the running service: view, openURL
	#[arg(long, value_name = "NAME", conflicts_with = "config")]
	signal: Option<String>,
}

fn edit_config(store: &ConfigStore, assignment: &str) -> SwitcherResult<()> {
	if assignment.trim().is_empty() {
		print!("{}", store.describe());
		println!("# File: {}", store.path().display());
		if let Some(log) = logging::log_path() {
			println!("# Log: {}", log.display());
		}
		return Ok(());
	}

	let Some((key, value)) = assignment.split_once('=') else {
		return Err(SwitcherError::InvalidArgument(format!(
			"expected KEY=VALUE, got '{assignment}'"
		)));
	};
	let key = key.trim();
	if key.is_empty() {
		return Err(SwitcherError::InvalidArgument("empty configuration key".to_string()));
	}

	store.write_value(key, value)?;
	info!("[{}][CONFIG] {} set to '{}'", DEBUG_NAME, key, value.trim());
	println!("{} = {}", key, value.trim());
	Ok(())
}

fn raise(kind: SignalKind) -> SwitcherResult<()> {
	signal_bus::trigger(APP_NAME, kind)?;
	println!("Sent {} to the running {}", kind, APP_NAME);
	Ok(())
}

fn run_service(store: ConfigStore) -> SwitcherResult<()> {
	let Some(_lock) = ServiceLock::acquire(APP_NAME)? else {
		info!("[{}] Service already running, requesting a switch", DEBUG_NAME);
		return signal_bus::trigger(APP_NAME, SignalKind::Switch);
	};

	let settings = store.load_or_default();
	let required = settings
		.require_base_path()
		.and_then(|base| settings.require_image_url().map(|url| (base, url)));
	let (base_path, image_url) = match required {
		Ok(found) => found,
		Err(e) => {
			error!(
				"[{}] {}. Set {} and {} in {}",
				DEBUG_NAME,
				e,
				KEY_BASE_PATH,
				KEY_IMAGE_URL,
				store.path().display()
			);
			let _ = ShellLauncher.open(&store.path().to_string_lossy());
			return Err(e);
		}
	};

	if settings.interval_was_clamped() {
		warn!(
			"[{}][CONFIG] IntervalSeconds={} is below the minimum, using {}s",
			DEBUG_NAME,
			settings.interval_seconds,
			settings.interval().as_secs()
		);
	}

	let wake = SignalBus::init(APP_NAME)?;
	let display = DisplayPower::default();
	platform::start_display_listener(&display);

	let current = settings.current_slot.unwrap_or(SlotId::A);
	let ctx = SchedulerContext {
		config: store,
		slots: SlotManager::new(&base_path, current),
		pipeline: PreparePipeline::new(Fetcher::http()),
		gate: ActivityGate::new(platform::activity_probe(), display),
		desktop: platform::wallpaper_sink(),
		lock_screen: platform::lock_screen_sink(),
		launcher: Box::new(ShellLauncher),
		wake: Box::new(wake),
	};

	info!("!---------- [{}] Starting {} service ----------!", DEBUG_NAME, APP_NAME);
	info!("[{}] Slots under {}, image from {}", DEBUG_NAME, base_path.display(), image_url);

	Scheduler::new(ctx, settings, image_url).run();
	Ok(())
}

fn main() -> ExitCode {
	let console = platform::attach_parent_console();
	let cli = Cli::parse();

	logging::init(log_file_path(), console);
	std::panic::set_hook(Box::new(|panic_info| {
		error!("[{}] Panic: {}", DEBUG_NAME, panic_info);
	}));

	let config_path = config_file_path();
	bootstrap::scaffold_config(&config_path);
	let store = ConfigStore::open(&config_path);
	logging::set_debug(store.load_or_default().log);

	let result = if let Some(assignment) = cli.config.as_deref() {
		edit_config(&store, assignment)
	} else if cli.switch {
		raise(SignalKind::Switch)
	} else if cli.quit {
		raise(SignalKind::Quit)
	} else if let Some(name) = cli.signal.as_deref() {
		SignalKind::parse(name)
			.ok_or_else(|| SwitcherError::InvalidArgument(format!("unknown signal '{name}'")))
			.and_then(raise)
	} else {
		run_service(store)
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("[{}] {}", DEBUG_NAME, e);
			eprintln!("{}: {}", APP_NAME, e);
			ExitCode::FAILURE
		}
	}
}
