use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
    time::{Duration, Instant},
};

use crate::{
    activity_gate::{ActivityGate, GateDecision},
    data_loaders::config::{ConfigStore, SwitcherConfig},
    error,
    error::SwitcherResult,
    image_classifier::classify_file,
    info, logging,
    pipeline::PreparePipeline,
    signal_bus::{SignalKind, WakeSource},
    sinks::{Launcher, LockScreenSink, WallpaperSink},
    slots::SlotManager,
    warn, DEBUG_NAME,
};

/// Everything the control loop touches, built once at startup.
pub struct SchedulerContext {
    pub config: ConfigStore,
    pub slots: SlotManager,
    pub pipeline: PreparePipeline,
    pub gate: ActivityGate,
    pub desktop: Box<dyn WallpaperSink>,
    pub lock_screen: Box<dyn LockScreenSink>,
    pub launcher: Box<dyn Launcher>,
    pub wake: Box<dyn WakeSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Gated(GateDecision),
    Preparing,
    Switching,
    Committed,
    RetryBackoff,
    Waiting(Duration),
    Done,
}

pub struct Scheduler {
    ctx: SchedulerContext,
    settings: SwitcherConfig,
    image_url: String,
}

impl Scheduler {
    pub fn new(ctx: SchedulerContext, settings: SwitcherConfig, image_url: String) -> Self {
        Self {
            ctx,
            settings,
            image_url,
        }
    }

    pub fn slots(&self) -> &SlotManager {
        &self.ctx.slots
    }

    pub fn run(&mut self) {
        self.startup();
        self.drive();
    }

    /// Creates both slot folders and fills the next slot once, so the first
    /// tick can switch straight away.
    pub fn startup(&mut self) {
        if let Err(e) = self.ctx.slots.ensure_dirs() {
            warn!("[{}][SCHED] Could not create slot folders: {}", DEBUG_NAME, e);
        }

        info!(
            "[{}][SCHED] Starting with {} current, interval {}s",
            DEBUG_NAME,
            self.ctx.slots.current_id(),
            self.settings.interval().as_secs()
        );

        if !self.ctx.slots.next().is_populated() {
            self.prepare_next();
        }
    }

    /// Runs ticks until Quit is observed.
    pub fn drive(&mut self) {
        let mut state = SchedulerState::Idle;
        while state != SchedulerState::Done {
            state = self.step(state);
        }
        info!("[{}][SCHED] Quit received, leaving the loop", DEBUG_NAME);
    }

    /// One transition. A panic inside it counts as a failed tick.
    pub fn step(&mut self, state: SchedulerState) -> SchedulerState {
        match panic::catch_unwind(AssertUnwindSafe(|| self.advance(state))) {
            Ok(next) => next,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("[{}][SCHED] Tick aborted in {:?}: {}", DEBUG_NAME, state, reason);
                SchedulerState::RetryBackoff
            }
        }
    }

    pub fn advance(&mut self, state: SchedulerState) -> SchedulerState {
        match state {
            SchedulerState::Idle => {
                self.refresh_settings();
                let decision = self.ctx.gate.evaluate(self.settings.idle_threshold());
                if !decision.is_allowed() {
                    SchedulerState::Gated(decision)
                } else if self.ctx.slots.is_populated(self.ctx.slots.next_id()) {
                    SchedulerState::Switching
                } else {
                    SchedulerState::Preparing
                }
            }

            SchedulerState::Gated(decision) => {
                info!("[{}][SCHED] Switch skipped: {}", DEBUG_NAME, decision);
                SchedulerState::Waiting(self.settings.interval())
            }

            SchedulerState::Preparing => {
                if self.prepare_next() {
                    SchedulerState::Switching
                } else {
                    SchedulerState::RetryBackoff
                }
            }

            SchedulerState::Switching => self.switch(),

            SchedulerState::Committed => {
                self.commit();
                SchedulerState::Waiting(self.settings.interval())
            }

            SchedulerState::RetryBackoff => {
                let retry = self.settings.retry_after();
                info!("[{}][SCHED] Retrying in {}s", DEBUG_NAME, retry.as_secs());
                SchedulerState::Waiting(retry)
            }

            SchedulerState::Waiting(timeout) => self.wait(timeout),

            SchedulerState::Done => SchedulerState::Done,
        }
    }

    /// Re-reads the configuration, keeping the last good values on a bad read.
    fn refresh_settings(&mut self) {
        if self.ctx.config.poll_external_change() {
            info!("[{}][CONFIG] {} changed on disk, reloading", DEBUG_NAME, self.ctx.config.path().display());
        }

        let Some(fresh) = self.ctx.config.load() else {
            warn!("[{}][CONFIG] Could not read configuration, keeping previous settings", DEBUG_NAME);
            return;
        };

        if fresh.interval_was_clamped() && fresh.interval_seconds != self.settings.interval_seconds {
            warn!(
                "[{}][CONFIG] IntervalSeconds={} is below the minimum, using {}s",
                DEBUG_NAME,
                fresh.interval_seconds,
                fresh.interval().as_secs()
            );
        }
        match fresh.require_image_url() {
            Ok(url) => self.image_url = url,
            Err(e) => warn!("[{}][CONFIG] {}, keeping {}", DEBUG_NAME, e, self.image_url),
        }
        if fresh.log != self.settings.log {
            logging::set_debug(fresh.log);
        }
        self.settings = fresh;
    }

    fn prepare_next(&mut self) -> bool {
        let quality = self.settings.jpg_quality;
        let extra = self.settings.extra_formats.clone();
        let slot = self.ctx.slots.next_mut();
        self.ctx.pipeline.prepare(slot, &self.image_url, quality, &extra)
    }

    fn switch(&mut self) -> SchedulerState {
        let next = self.ctx.slots.next();

        if let Err(e) = self.apply_desktop(&next.dir) {
            warn!("[{}][SWITCH] Desktop wallpaper not applied: {}", DEBUG_NAME, e);
            return SchedulerState::Waiting(self.settings.interval());
        }
        info!("[{}][SWITCH] Desktop now shows {}", DEBUG_NAME, next.id);

        if self.settings.lock_screen {
            match next.primary_file() {
                Some(file) if classify_file(&file).is_safe() => {
                    if let Err(e) = self.apply_lock_screen(&file) {
                        warn!("[{}][SWITCH] Lock screen not applied: {}", DEBUG_NAME, e);
                    }
                }
                Some(file) => warn!(
                    "[{}][SWITCH] Lock screen skipped, {} is not a lock screen format",
                    DEBUG_NAME,
                    file.display()
                ),
                None => warn!("[{}][SWITCH] Lock screen skipped, {} has no image", DEBUG_NAME, next.id),
            }
        }

        SchedulerState::Committed
    }

    fn apply_desktop(&self, folder: &Path) -> SwitcherResult<()> {
        self.ctx.desktop.set_folder(folder)?;
        Ok(())
    }

    fn apply_lock_screen(&self, file: &Path) -> SwitcherResult<()> {
        self.ctx.lock_screen.set_image(file)?;
        Ok(())
    }

    fn commit(&mut self) {
        self.ctx.slots.swap();
        let current = self.ctx.slots.current_id();
        if let Err(e) = self.ctx.config.write_current_slot(current) {
            warn!("[{}][SCHED] Could not persist CurrentSlot={}: {}", DEBUG_NAME, current, e);
        }

        if !self.prepare_next() {
            info!("[{}][SCHED] {} will be prepared on the next tick", DEBUG_NAME, self.ctx.slots.next_id());
        }
    }

    /// Blocks until the timeout or a signal. View and OpenURL are served
    /// in place and the remaining wait resumes.
    fn wait(&mut self, timeout: Duration) -> SchedulerState {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.ctx.wake.wait_any(remaining) {
                None => return SchedulerState::Idle,
                Some(SignalKind::Quit) => return SchedulerState::Done,
                Some(SignalKind::Switch) => {
                    info!("[{}][SIGNAL] Switch requested", DEBUG_NAME);
                    return SchedulerState::Idle;
                }
                Some(SignalKind::View) => self.view_current(),
                Some(SignalKind::OpenUrl) => self.open_source_url(),
            }
        }
    }

    fn view_current(&self) {
        let current = self.ctx.slots.current();
        let Some(file) = current.primary_file() else {
            warn!("[{}][VIEW] {} has no image to show", DEBUG_NAME, current.id);
            return;
        };
        if let Err(e) = self.ctx.launcher.open(&file.to_string_lossy()) {
            warn!("[{}][VIEW] Could not open {}: {}", DEBUG_NAME, file.display(), e);
        }
    }

    fn open_source_url(&self) {
        let current = self.ctx.slots.current();
        let Some(url) = current.source_url.as_deref() else {
            warn!("[{}][VIEW] Source URL of {} is unknown", DEBUG_NAME, current.id);
            return;
        };
        if let Err(e) = self.ctx.launcher.open(url) {
            warn!("[{}][VIEW] Could not open {}: {}", DEBUG_NAME, url, e);
        }
    }
}
