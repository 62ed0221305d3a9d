use std::{io::IsTerminal, time::Duration};

use crate::{
    activity_gate::{ActivityProbe, DisplayPower},
    info,
    sinks::{LockScreenSink, UnsupportedSink, WallpaperSink},
    DEBUG_NAME,
};

/// Nothing to ask the desktop here, so every switch is allowed.
struct NeverBusy;

impl ActivityProbe for NeverBusy {
    fn session_locked(&self) -> bool {
        false
    }

    fn foreground_busy(&self) -> bool {
        false
    }

    fn idle_duration(&self) -> Option<Duration> {
        None
    }
}

pub fn activity_probe() -> Box<dyn ActivityProbe> {
    Box::new(NeverBusy)
}

/// No power notifications; the flag stays at its "on" default.
pub fn start_display_listener(_display: &DisplayPower) {
    info!("[{}][POWER] Display power notifications unavailable on this platform", DEBUG_NAME);
}

pub fn wallpaper_sink() -> Box<dyn WallpaperSink> {
    Box::new(UnsupportedSink)
}

pub fn lock_screen_sink() -> Box<dyn LockScreenSink> {
    Box::new(UnsupportedSink)
}

pub fn attach_parent_console() -> bool {
    std::io::stdout().is_terminal()
}
