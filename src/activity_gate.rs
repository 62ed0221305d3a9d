use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Window classes of the desktop background and taskbars; never "busy".
pub const SHELL_WINDOW_CLASSES: &[&str] = &["WorkerW", "Progman", "Shell_TrayWnd", "Shell_SecondaryTrayWnd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    BlockedBusy,
    BlockedLocked,
    BlockedIdle,
    BlockedDisplayOff,
}

impl GateDecision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allowed => "allowed",
            Self::BlockedBusy => "fullscreen or maximized window",
            Self::BlockedLocked => "session locked",
            Self::BlockedIdle => "user idle",
            Self::BlockedDisplayOff => "display off",
        })
    }
}

/// Latest display power state reported by the OS listener.
///
/// Starts as "on" so nothing is blocked before the first notification.
#[derive(Debug, Clone)]
pub struct DisplayPower(Arc<AtomicBool>);

impl Default for DisplayPower {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl DisplayPower {
    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::Release);
    }
}

/// Read-only questions about what the user is doing right now.
pub trait ActivityProbe: Send {
    fn session_locked(&self) -> bool;
    fn foreground_busy(&self) -> bool;
    /// `None` when the platform cannot tell.
    fn idle_duration(&self) -> Option<Duration>;
    /// Remote sessions have no local display to power off.
    fn remote_session(&self) -> bool {
        false
    }
}

pub struct ActivityGate {
    probe: Box<dyn ActivityProbe>,
    display: DisplayPower,
}

impl ActivityGate {
    pub fn new(probe: Box<dyn ActivityProbe>, display: DisplayPower) -> Self {
        Self { probe, display }
    }

    /// First matching reason wins: locked, busy, idle, display off.
    /// `idle_threshold = None` disables the idle check.
    pub fn evaluate(&self, idle_threshold: Option<Duration>) -> GateDecision {
        if self.probe.session_locked() {
            return GateDecision::BlockedLocked;
        }
        if self.probe.foreground_busy() {
            return GateDecision::BlockedBusy;
        }
        if let (Some(threshold), Some(idle)) = (idle_threshold, self.probe.idle_duration()) {
            if idle >= threshold {
                return GateDecision::BlockedIdle;
            }
        }
        if !self.display.is_on() && !self.probe.remote_session() {
            return GateDecision::BlockedDisplayOff;
        }
        GateDecision::Allowed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// A window whose bounds reach every edge of its monitor counts as fullscreen.
pub fn covers_monitor(window: ScreenRect, monitor: ScreenRect) -> bool {
    window.left <= monitor.left
        && window.top <= monitor.top
        && window.right >= monitor.right
        && window.bottom >= monitor.bottom
}

pub fn is_shell_window_class(class_name: &str) -> bool {
    SHELL_WINDOW_CLASSES.contains(&class_name)
}
