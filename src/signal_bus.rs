use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{SwitcherError, SwitcherResult},
    info, warn, DEBUG_NAME,
};

const SIGNAL_SCOPE: &str = r"Global\";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Quit,
    Switch,
    View,
    OpenUrl,
}

impl SignalKind {
    /// Wait priority: when several are pending, earlier entries are reported first.
    pub const ALL: [SignalKind; 4] = [Self::Quit, Self::Switch, Self::View, Self::OpenUrl];

    pub fn name(self) -> &'static str {
        match self {
            Self::Quit => "Quit",
            Self::Switch => "Switch",
            Self::View => "View",
            Self::OpenUrl => "OpenURL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|k| k.name().eq_ignore_ascii_case(raw))
    }

    fn index(self) -> usize {
        match self {
            Self::Quit => 0,
            Self::Switch => 1,
            Self::View => 2,
            Self::OpenUrl => 3,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn signal_name(app: &str, kind: SignalKind) -> String {
    format!("{SIGNAL_SCOPE}{app}{}Signal", kind.name())
}

pub fn service_lock_name(app: &str) -> String {
    format!("{SIGNAL_SCOPE}{app}ServiceMutex")
}

/// Anything the scheduler can block on between ticks.
pub trait WakeSource: Send {
    /// `None` on timeout.
    fn wait_any(&self, timeout: Duration) -> Option<SignalKind>;
}

impl<T: WakeSource + Sync> WakeSource for Arc<T> {
    fn wait_any(&self, timeout: Duration) -> Option<SignalKind> {
        (**self).wait_any(timeout)
    }
}

/// In-process auto-reset flags, one per kind.
#[derive(Default)]
pub struct LocalSignals {
    pending: Mutex<[bool; 4]>,
    cond: Condvar,
}

impl LocalSignals {
    /// Raising an already pending kind is a no-op.
    pub fn raise(&self, kind: SignalKind) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        pending[kind.index()] = true;
        self.cond.notify_all();
    }

    fn take(pending: &mut [bool; 4]) -> Option<SignalKind> {
        let kind = SignalKind::ALL.into_iter().find(|k| pending[k.index()])?;
        pending[kind.index()] = false;
        Some(kind)
    }
}

impl WakeSource for LocalSignals {
    fn wait_any(&self, timeout: Duration) -> Option<SignalKind> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock().ok()?;

        loop {
            if let Some(kind) = Self::take(&mut pending) {
                return Some(kind);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            pending = self.cond.wait_timeout(pending, remaining).ok()?.0;
        }
    }
}

/// Cross-process wake signals owned by the service instance.
pub struct SignalBus {
    listener: imp::Listener,
}

impl SignalBus {
    pub fn init(app: &str) -> SwitcherResult<Self> {
        let listener = imp::Listener::open(app)?;
        info!("[{}][SIGNAL] Listening for {:?}", DEBUG_NAME, SignalKind::ALL);
        Ok(Self { listener })
    }
}

impl WakeSource for SignalBus {
    fn wait_any(&self, timeout: Duration) -> Option<SignalKind> {
        let started = Instant::now();
        settle_wait(self.listener.wait_any(timeout), started, timeout)
    }
}

/// A failed wait returns at once. It is logged and the rest of `timeout` is
/// slept out, so the caller sees an ordinary timeout instead of spinning.
fn settle_wait(result: SwitcherResult<Option<SignalKind>>, started: Instant, timeout: Duration) -> Option<SignalKind> {
    match result {
        Ok(kind) => kind,
        Err(e) => {
            warn!("[{}][SIGNAL] Wait failed: {}", DEBUG_NAME, e);
            thread::sleep(timeout.saturating_sub(started.elapsed()));
            None
        }
    }
}

/// Raises `kind` on the running service, retrying briefly while it starts up.
pub fn trigger(app: &str, kind: SignalKind) -> SwitcherResult<()> {
    let delays_ms = [100u64, 250, 500];
    let mut last_err = SwitcherError::SignalUnavailable(signal_name(app, kind));

    for attempt in 0..=delays_ms.len() {
        match imp::trigger(app, kind) {
            Ok(()) => {
                info!("[{}][SIGNAL] Raised {} (attempt {})", DEBUG_NAME, kind, attempt + 1);
                return Ok(());
            }
            Err(e) => last_err = e,
        }
        if let Some(delay) = delays_ms.get(attempt) {
            thread::sleep(Duration::from_millis(*delay));
        }
    }

    warn!("[{}][SIGNAL] Could not raise {}: {}", DEBUG_NAME, kind, last_err);
    Err(last_err)
}

/// Exclusive ownership of the service role. Released on drop.
pub struct ServiceLock {
    _inner: imp::Lock,
}

impl ServiceLock {
    /// `Ok(None)` when another instance already holds the lock.
    pub fn acquire(app: &str) -> SwitcherResult<Option<Self>> {
        Ok(imp::Lock::acquire(app)?.map(|inner| Self { _inner: inner }))
    }
}

#[cfg(windows)]
mod imp {
    use std::time::Duration;

    use windows::{
        core::PCWSTR,
        Win32::{
            Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT},
            System::Threading::{
                CreateEventW, CreateMutexW, OpenEventW, ReleaseMutex, SetEvent, WaitForMultipleObjects,
                EVENT_MODIFY_STATE,
            },
        },
    };

    use super::{service_lock_name, signal_name, SignalKind};
    use crate::{
        error::{SwitcherError, SwitcherResult},
        utility::to_wstring,
    };

    pub struct Listener {
        events: Vec<(SignalKind, HANDLE)>,
    }

    // Kernel handles are process-wide.
    unsafe impl Send for Listener {}
    unsafe impl Sync for Listener {}

    impl Listener {
        pub fn open(app: &str) -> SwitcherResult<Self> {
            let mut listener = Self { events: Vec::new() };
            for kind in SignalKind::ALL {
                let name = to_wstring(&signal_name(app, kind));
                let handle = unsafe { CreateEventW(None, false, false, PCWSTR(name.as_ptr())) }
                    .map_err(|e| SwitcherError::SignalUnavailable(format!("{}: {}", signal_name(app, kind), e)))?;
                listener.events.push((kind, handle));
            }
            Ok(listener)
        }

        pub fn wait_any(&self, timeout: Duration) -> SwitcherResult<Option<SignalKind>> {
            let handles: Vec<HANDLE> = self.events.iter().map(|(_, h)| *h).collect();
            let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);

            let result = unsafe { WaitForMultipleObjects(&handles, false, millis) };
            if result == WAIT_TIMEOUT {
                return Ok(None);
            }
            let index = result.0.wrapping_sub(WAIT_OBJECT_0.0) as usize;
            match self.events.get(index) {
                Some((kind, _)) => Ok(Some(*kind)),
                None => Err(SwitcherError::SignalUnavailable(format!(
                    "WaitForMultipleObjects returned {:#x}: {:?}",
                    result.0,
                    unsafe { GetLastError() }
                ))),
            }
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            for (_, handle) in self.events.drain(..) {
                let _ = unsafe { CloseHandle(handle) };
            }
        }
    }

    pub fn trigger(app: &str, kind: SignalKind) -> SwitcherResult<()> {
        let name = signal_name(app, kind);
        let wide = to_wstring(&name);
        let handle = unsafe { OpenEventW(EVENT_MODIFY_STATE, false, PCWSTR(wide.as_ptr())) }
            .map_err(|_| SwitcherError::SignalUnavailable(name.clone()))?;

        let result = unsafe { SetEvent(handle) };
        let _ = unsafe { CloseHandle(handle) };
        result.map_err(|e| SwitcherError::SignalUnavailable(format!("{name}: {e}")))
    }

    pub struct Lock(HANDLE);

    unsafe impl Send for Lock {}

    impl Lock {
        pub fn acquire(app: &str) -> SwitcherResult<Option<Self>> {
            let name = service_lock_name(app);
            let wide = to_wstring(&name);
            let handle = unsafe { CreateMutexW(None, true, PCWSTR(wide.as_ptr())) }
                .map_err(|e| SwitcherError::SignalUnavailable(format!("{name}: {e}")))?;

            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                let _ = unsafe { CloseHandle(handle) };
                return Ok(None);
            }
            Ok(Some(Self(handle)))
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            unsafe {
                let _ = ReleaseMutex(self.0);
                let _ = CloseHandle(self.0);
            }
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::{
        fs,
        io::{self, BufRead, BufReader, Write},
        os::unix::net::{UnixListener, UnixStream},
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::{service_lock_name, signal_name, LocalSignals, SignalKind, WakeSource, SIGNAL_SCOPE};
    use crate::{
        error::{SwitcherError, SwitcherResult},
        utility::runtime_dir,
        warn, DEBUG_NAME,
    };

    /// `Global\AppQuitSignal` becomes `<runtime dir>/AppSignals.sock`.
    fn signals_socket(dir: &Path, app: &str) -> PathBuf {
        dir.join(format!("{app}Signals.sock"))
    }

    fn lock_socket(dir: &Path, app: &str) -> PathBuf {
        let name = service_lock_name(app);
        dir.join(format!("{}.sock", name.trim_start_matches(SIGNAL_SCOPE)))
    }

    /// Binds `path`, replacing a socket file nobody answers on.
    fn bind_exclusive(path: &Path) -> io::Result<Option<UnixListener>> {
        match UnixListener::bind(path) {
            Ok(listener) => Ok(Some(listener)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if UnixStream::connect(path).is_ok() {
                    return Ok(None);
                }
                fs::remove_file(path)?;
                UnixListener::bind(path).map(Some)
            }
            Err(e) => Err(e),
        }
    }

    fn restrict_permissions(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    /// Accepts connections on `listener` until `stop` is set, handing each one
    /// to `on_stream`. Nothing is left waiting in the backlog.
    fn serve(listener: UnixListener, stop: Arc<AtomicBool>, mut on_stream: impl FnMut(UnixStream) + Send + 'static) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if let Ok(stream) = stream {
                    on_stream(stream);
                }
            }
        });
    }

    /// Sets the stop flag and wakes the accept loop so it sees it.
    fn shutdown(path: &Path, stop: &AtomicBool) {
        stop.store(true, Ordering::Release);
        let _ = UnixStream::connect(path);
        let _ = fs::remove_file(path);
    }

    pub struct Listener {
        signals: Arc<LocalSignals>,
        path: PathBuf,
        stop: Arc<AtomicBool>,
    }

    impl Listener {
        pub fn open(app: &str) -> SwitcherResult<Self> {
            Self::open_in(&runtime_dir(), app)
        }

        pub(super) fn open_in(dir: &Path, app: &str) -> SwitcherResult<Self> {
            fs::create_dir_all(dir)?;
            let path = signals_socket(dir, app);
            let listener = bind_exclusive(&path)?.ok_or_else(|| {
                SwitcherError::SignalUnavailable(format!("{} is owned by another process", path.display()))
            })?;
            restrict_permissions(&path);

            let signals = Arc::new(LocalSignals::default());
            let stop = Arc::new(AtomicBool::new(false));
            let raised = signals.clone();

            serve(listener, stop.clone(), move |stream| {
                let mut line = String::new();
                if BufReader::new(stream).read_line(&mut line).is_err() {
                    return;
                }
                match SignalKind::parse(&line) {
                    Some(kind) => raised.raise(kind),
                    None => warn!("[{}][SIGNAL] Ignoring unknown signal {:?}", DEBUG_NAME, line.trim()),
                }
            });

            Ok(Self { signals, path, stop })
        }

        pub fn wait_any(&self, timeout: Duration) -> SwitcherResult<Option<SignalKind>> {
            Ok(self.signals.wait_any(timeout))
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            shutdown(&self.path, &self.stop);
        }
    }

    pub fn trigger(app: &str, kind: SignalKind) -> SwitcherResult<()> {
        trigger_in(&runtime_dir(), app, kind)
    }

    pub(super) fn trigger_in(dir: &Path, app: &str, kind: SignalKind) -> SwitcherResult<()> {
        let unavailable = || SwitcherError::SignalUnavailable(signal_name(app, kind));
        let mut stream = UnixStream::connect(signals_socket(dir, app)).map_err(|_| unavailable())?;
        writeln!(stream, "{}", kind.name()).map_err(|_| unavailable())?;
        Ok(())
    }

    pub struct Lock {
        pub(super) path: PathBuf,
        stop: Arc<AtomicBool>,
    }

    impl Lock {
        pub fn acquire(app: &str) -> SwitcherResult<Option<Self>> {
            Self::acquire_in(&runtime_dir(), app)
        }

        pub(super) fn acquire_in(dir: &Path, app: &str) -> SwitcherResult<Option<Self>> {
            fs::create_dir_all(dir)?;
            let path = lock_socket(dir, app);
            let Some(listener) = bind_exclusive(&path)? else {
                return Ok(None);
            };
            restrict_permissions(&path);

            // Later launches connect here to detect the service; accept and drop them.
            let stop = Arc::new(AtomicBool::new(false));
            serve(listener, stop.clone(), drop);
            Ok(Some(Self { path, stop }))
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            shutdown(&self.path, &self.stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_scoped_and_stable() {
        assert_eq!(signal_name("WallpaperSwitcher", SignalKind::Quit), r"Global\WallpaperSwitcherQuitSignal");
        assert_eq!(
            signal_name("WallpaperSwitcher", SignalKind::OpenUrl),
            r"Global\WallpaperSwitcherOpenURLSignal"
        );
        assert_eq!(service_lock_name("WallpaperSwitcher"), r"Global\WallpaperSwitcherServiceMutex");
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!(SignalKind::parse("switch"), Some(SignalKind::Switch));
        assert_eq!(SignalKind::parse(" openurl\n"), Some(SignalKind::OpenUrl));
        assert_eq!(SignalKind::parse("reboot"), None);
    }

    #[test]
    fn local_signals_time_out_when_nothing_is_raised() {
        let signals = LocalSignals::default();
        let started = Instant::now();
        assert_eq!(signals.wait_any(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn local_signals_auto_reset_and_prioritise_quit() {
        let signals = LocalSignals::default();
        signals.raise(SignalKind::Switch);
        signals.raise(SignalKind::Switch);
        signals.raise(SignalKind::Quit);

        assert_eq!(signals.wait_any(Duration::ZERO), Some(SignalKind::Quit));
        assert_eq!(signals.wait_any(Duration::ZERO), Some(SignalKind::Switch));
        assert_eq!(signals.wait_any(Duration::ZERO), None);
    }

    #[test]
    fn raise_from_another_thread_wakes_the_waiter() {
        let signals = Arc::new(LocalSignals::default());
        let raiser = signals.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise(SignalKind::Switch);
        });

        let started = Instant::now();
        assert_eq!(signals.wait_any(Duration::from_secs(10)), Some(SignalKind::Switch));
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn failed_wait_still_takes_the_full_timeout() {
        let started = Instant::now();
        let failed = Err(SwitcherError::SignalUnavailable("wait failed".to_string()));

        assert_eq!(settle_wait(failed, started, Duration::from_millis(40)), None);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(
            settle_wait(Ok(Some(SignalKind::View)), Instant::now(), Duration::from_secs(5)),
            Some(SignalKind::View)
        );
    }

    #[cfg(unix)]
    #[test]
    fn socket_trigger_reaches_listener() {
        let dir = tempfile::tempdir().unwrap();
        let listener = imp::Listener::open_in(dir.path(), "Test").unwrap();

        imp::trigger_in(dir.path(), "Test", SignalKind::View).unwrap();
        assert_eq!(listener.wait_any(Duration::from_secs(5)).unwrap(), Some(SignalKind::View));
        assert_eq!(listener.wait_any(Duration::from_millis(10)).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn trigger_without_listener_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        match imp::trigger_in(dir.path(), "Test", SignalKind::Switch) {
            Err(SwitcherError::SignalUnavailable(name)) => assert_eq!(name, r"Global\TestSwitchSignal"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn service_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let first = imp::Lock::acquire_in(dir.path(), "Test").unwrap();
        assert!(first.is_some());
        assert!(imp::Lock::acquire_in(dir.path(), "Test").unwrap().is_none());

        drop(first);
        assert!(imp::Lock::acquire_in(dir.path(), "Test").unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn repeated_launches_never_block_on_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _held = imp::Lock::acquire_in(dir.path(), "Test").unwrap().unwrap();

        let launch_dir = dir.path().to_path_buf();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            // More attempts than any listen backlog.
            for _ in 0..5000 {
                assert!(imp::Lock::acquire_in(&launch_dir, "Test").unwrap().is_none());
            }
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_secs(60)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_socket_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let first = imp::Lock::acquire_in(dir.path(), "Test").unwrap().unwrap();
        // Leak the file without a listener behind it.
        let path = first.path.clone();
        drop(first);
        let _ = std::os::unix::net::UnixListener::bind(&path);

        assert!(imp::Lock::acquire_in(dir.path(), "Test").unwrap().is_some());
    }
}
