//! OS-facing adapters behind the core traits.

#[cfg(not(windows))]
mod fallback;
#[cfg(windows)]
mod win32;

#[cfg(not(windows))]
pub use fallback::{activity_probe, attach_parent_console, lock_screen_sink, start_display_listener, wallpaper_sink};
#[cfg(windows)]
pub use win32::{activity_probe, attach_parent_console, lock_screen_sink, start_display_listener, wallpaper_sink};
