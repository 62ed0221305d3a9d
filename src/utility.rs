use std::{
    env,
    path::{Path, PathBuf},
};

#[cfg(windows)]
pub fn to_wstring(s: &str) -> Vec<u16> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};

    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Directory holding the running executable, falling back to the working directory.
pub fn exe_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// `config.yaml` in the directory named by `WS_CONFIG`, else next to the executable.
pub fn config_file_path() -> PathBuf {
    config_dir_from(env::var("WS_CONFIG").ok().as_deref()).join("config.yaml")
}

fn config_dir_from(env_value: Option<&str>) -> PathBuf {
    if let Some(raw) = env_value {
        let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if !trimmed.is_empty() {
            let dir = PathBuf::from(trimmed);
            if dir.is_absolute() {
                return dir;
            }
            if let Ok(cwd) = env::current_dir() {
                return cwd.join(dir);
            }
        }
    }

    exe_dir()
}

pub fn log_file_path() -> PathBuf {
    exe_dir().join("debug.log")
}

/// Runtime directory for the non-Windows signal sockets.
#[cfg(not(windows))]
pub fn runtime_dir() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .unwrap_or_else(env::temp_dir)
}

/// First bytes of a payload as `FF-D8-FF-E0`, for diagnostics.
pub fn hex_signature(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_config_quotes_are_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let quoted = format!("\"{}\"", dir.path().display());
        assert_eq!(config_dir_from(Some(&quoted)), dir.path());
    }

    #[test]
    fn empty_ws_config_falls_back_to_exe_dir() {
        assert_eq!(config_dir_from(Some("  ")), exe_dir());
        assert_eq!(config_dir_from(None), exe_dir());
    }

    #[test]
    fn hex_signature_formats_leading_bytes() {
        assert_eq!(hex_signature(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00], 4), "FF-D8-FF-E0");
        assert_eq!(hex_signature(&[0x01], 8), "01");
    }
}
