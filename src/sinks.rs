use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{call} failed: {message}")]
    Call { call: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub fn call(call: &'static str, message: impl ToString) -> Self {
        Self::Call {
            call,
            message: message.to_string(),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for SinkError {
    fn from(e: windows::core::Error) -> Self {
        Self::call("windows", e.message())
    }
}

/// Paints the desktop background from a prepared slot folder.
pub trait WallpaperSink: Send {
    fn set_folder(&self, folder: &Path) -> Result<(), SinkError>;
}

pub trait LockScreenSink: Send {
    fn set_image(&self, file: &Path) -> Result<(), SinkError>;
}

/// Hands a file or URL to the desktop's default handler.
pub trait Launcher: Send {
    fn open(&self, target: &str) -> Result<(), SinkError>;
}

pub struct UnsupportedSink;

impl WallpaperSink for UnsupportedSink {
    fn set_folder(&self, _folder: &Path) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("desktop wallpaper"))
    }
}

impl LockScreenSink for UnsupportedSink {
    fn set_image(&self, _file: &Path) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("lock screen image"))
    }
}

/// `cmd /C start` on Windows, `open` on macOS, `xdg-open` elsewhere.
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn open(&self, target: &str) -> Result<(), SinkError> {
        let mut command = if cfg!(windows) {
            let mut c = std::process::Command::new("cmd");
            c.args(["/C", "start", ""]);
            c
        } else if cfg!(target_os = "macos") {
            std::process::Command::new("open")
        } else {
            std::process::Command::new("xdg-open")
        };

        command.arg(target).spawn()?;
        Ok(())
    }
}
