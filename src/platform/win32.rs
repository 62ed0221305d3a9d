use std::{
    mem,
    path::Path,
    ptr,
    sync::{mpsc, OnceLock},
    thread,
    time::Duration,
};

use windows::{
    core::{w, HSTRING, PCWSTR},
    Storage::StorageFile,
    System::UserProfile::LockScreen,
    Win32::{
        Foundation::{HANDLE, HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM},
        Graphics::Gdi::{GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITOR_DEFAULTTOPRIMARY},
        System::{
            Com::{CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_APARTMENTTHREADED},
            Console::{AttachConsole, ATTACH_PARENT_PROCESS},
            LibraryLoader::GetModuleHandleW,
            Power::{RegisterPowerSettingNotification, POWERBROADCAST_SETTING},
            StationsAndDesktops::{CloseDesktop, OpenInputDesktop, DESKTOP_CONTROL_FLAGS, DESKTOP_SWITCHDESKTOP},
            SystemInformation::GetTickCount,
            SystemServices::GUID_MONITOR_POWER_ON,
        },
        UI::{
            Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO},
            Shell::{
                DesktopWallpaper, IDesktopWallpaper, IShellItem, IShellItemArray, SHCreateItemFromParsingName,
                SHCreateShellItemArrayFromShellItem,
            },
            WindowsAndMessaging::{
                CreateWindowExW, DefWindowProcW, DispatchMessageW, GetClassNameW, GetForegroundWindow,
                GetMessageW, GetShellWindow, GetSystemMetrics, GetWindowRect, IsZoomed, RegisterClassW,
                TranslateMessage, DEVICE_NOTIFY_WINDOW_HANDLE, HWND_MESSAGE, MSG, PBT_POWERSETTINGCHANGE,
                SM_REMOTESESSION, WINDOW_EX_STYLE, WINDOW_STYLE, WM_POWERBROADCAST, WNDCLASSW,
            },
        },
    },
};

use crate::{
    activity_gate::{covers_monitor, is_shell_window_class, ActivityProbe, DisplayPower, ScreenRect},
    info,
    sinks::{LockScreenSink, SinkError, WallpaperSink},
    warn, DEBUG_NAME,
};

const POWER_CLASS_NAME: PCWSTR = w!("WallpaperSwitcherPowerWindow");

static DISPLAY: OnceLock<DisplayPower> = OnceLock::new();

/* =========================
   ACTIVITY
   ========================= */

struct DesktopProbe;

impl ActivityProbe for DesktopProbe {
    fn session_locked(&self) -> bool {
        // The secure desktop refuses to open while the session is locked.
        match unsafe { OpenInputDesktop(DESKTOP_CONTROL_FLAGS(0), false, DESKTOP_SWITCHDESKTOP) } {
            Ok(desktop) => {
                let _ = unsafe { CloseDesktop(desktop) };
                false
            }
            Err(_) => true,
        }
    }

    fn foreground_busy(&self) -> bool {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() || is_shell_window(hwnd) {
            return false;
        }
        if unsafe { IsZoomed(hwnd) }.as_bool() {
            return true;
        }

        match (window_rect(hwnd), monitor_rect(hwnd)) {
            (Some(window), Some(monitor)) => covers_monitor(window, monitor),
            _ => false,
        }
    }

    fn idle_duration(&self) -> Option<Duration> {
        let mut info = LASTINPUTINFO {
            cbSize: mem::size_of::<LASTINPUTINFO>() as u32,
            dwTime: 0,
        };
        if !unsafe { GetLastInputInfo(&mut info) }.as_bool() {
            return None;
        }
        // Both counters wrap after ~49.7 days.
        let elapsed = unsafe { GetTickCount() }.wrapping_sub(info.dwTime);
        Some(Duration::from_millis(u64::from(elapsed)))
    }

    fn remote_session(&self) -> bool {
        unsafe { GetSystemMetrics(SM_REMOTESESSION) != 0 }
    }
}

fn is_shell_window(hwnd: HWND) -> bool {
    if hwnd == unsafe { GetShellWindow() } {
        return true;
    }
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    if len <= 0 {
        return false;
    }
    is_shell_window_class(&String::from_utf16_lossy(&buf[..len as usize]))
}

fn window_rect(hwnd: HWND) -> Option<ScreenRect> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
    Some(to_screen_rect(rect))
}

fn monitor_rect(hwnd: HWND) -> Option<ScreenRect> {
    let monitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTOPRIMARY) };
    let mut info = MONITORINFO {
        cbSize: mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if !unsafe { GetMonitorInfoW(monitor, &mut info) }.as_bool() {
        return None;
    }
    Some(to_screen_rect(info.rcMonitor))
}

fn to_screen_rect(rect: RECT) -> ScreenRect {
    ScreenRect {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

pub fn activity_probe() -> Box<dyn ActivityProbe> {
    Box::new(DesktopProbe)
}

/* =========================
   DISPLAY POWER
   ========================= */

/// Spawns the hidden message-only window that tracks `GUID_MONITOR_POWER_ON`.
pub fn start_display_listener(display: &DisplayPower) {
    if DISPLAY.set(display.clone()).is_err() {
        return;
    }

    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
    thread::spawn(move || {
        let hwnd = match create_power_window() {
            Ok(hwnd) => hwnd,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        let registered = unsafe {
            RegisterPowerSettingNotification(HANDLE(hwnd.0), &GUID_MONITOR_POWER_ON, DEVICE_NOTIFY_WINDOW_HANDLE)
        };
        if let Err(e) = registered {
            let _ = ready_tx.send(Err(format!("RegisterPowerSettingNotification failed: {e:?}")));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        let mut msg = MSG::default();
        while unsafe { GetMessageW(&mut msg, None, 0, 0) }.0 > 0 {
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    });

    match ready_rx.recv_timeout(Duration::from_millis(500)) {
        Ok(Ok(())) => info!("[{}][POWER] Display power listener running", DEBUG_NAME),
        Ok(Err(e)) => warn!("[{}][POWER] Display power listener unavailable: {}", DEBUG_NAME, e),
        Err(_) => warn!("[{}][POWER] Display power listener slow to start", DEBUG_NAME),
    }
}

fn create_power_window() -> Result<HWND, String> {
    let hinstance = unsafe {
        GetModuleHandleW(None)
            .map(|h| HINSTANCE(h.0))
            .map_err(|e| format!("GetModuleHandleW failed: {e:?}"))?
    };

    let wc = WNDCLASSW {
        lpfnWndProc: Some(power_window_proc),
        hInstance: hinstance,
        lpszClassName: POWER_CLASS_NAME,
        ..Default::default()
    };
    unsafe {
        let _ = RegisterClassW(&wc);
    }

    unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            POWER_CLASS_NAME,
            PCWSTR::null(),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            Some(HWND_MESSAGE),
            None,
            Some(hinstance),
            Some(ptr::null()),
        )
    }
    .map_err(|e| format!("CreateWindowExW failed: {e:?}"))
}

unsafe extern "system" fn power_window_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if msg == WM_POWERBROADCAST && wparam.0 as u32 == PBT_POWERSETTINGCHANGE && lparam.0 != 0 {
        let setting = &*(lparam.0 as *const POWERBROADCAST_SETTING);
        if setting.PowerSetting == GUID_MONITOR_POWER_ON && setting.DataLength > 0 {
            // 0 = off, 1 = on, 2 = dimmed.
            let on = setting.Data[0] != 0;
            if let Some(display) = DISPLAY.get() {
                if display.is_on() != on {
                    info!("[{}][POWER] Display {}", DEBUG_NAME, if on { "on" } else { "off" });
                }
                display.set(on);
            }
        }
        return LRESULT(1);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/* =========================
   SINKS
   ========================= */

/// `IDesktopWallpaper::SetSlideshow` over the slot folder.
struct SlideshowSink;

impl WallpaperSink for SlideshowSink {
    fn set_folder(&self, folder: &Path) -> Result<(), SinkError> {
        unsafe {
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);

            let item: IShellItem = SHCreateItemFromParsingName(&HSTRING::from(folder.as_os_str()), None)
                .map_err(|e| SinkError::call("SHCreateItemFromParsingName", e.message()))?;
            let items: IShellItemArray = SHCreateShellItemArrayFromShellItem(&item)
                .map_err(|e| SinkError::call("SHCreateShellItemArrayFromShellItem", e.message()))?;
            let wallpaper: IDesktopWallpaper = CoCreateInstance(&DesktopWallpaper, None, CLSCTX_ALL)
                .map_err(|e| SinkError::call("CoCreateInstance(DesktopWallpaper)", e.message()))?;

            wallpaper
                .SetSlideshow(&items)
                .map_err(|e| SinkError::call("IDesktopWallpaper::SetSlideshow", e.message()))
        }
    }
}

/// WinRT `LockScreen::SetImageFileAsync`, awaited on a worker thread.
struct WinRtLockScreen;

impl LockScreenSink for WinRtLockScreen {
    fn set_image(&self, file: &Path) -> Result<(), SinkError> {
        let file = file.to_path_buf();
        thread::spawn(move || set_lock_screen_image(&file))
            .join()
            .map_err(|_| SinkError::call("LockScreen::SetImageFileAsync", "worker panicked"))?
    }
}

fn set_lock_screen_image(file: &Path) -> Result<(), SinkError> {
    let storage_file = StorageFile::GetFileFromPathAsync(&HSTRING::from(file.as_os_str()))
        .and_then(|op| op.get())
        .map_err(|e| SinkError::call("StorageFile::GetFileFromPathAsync", e.message()))?;

    LockScreen::SetImageFileAsync(&storage_file)
        .and_then(|op| op.get())
        .map_err(|e| SinkError::call("LockScreen::SetImageFileAsync", e.message()))
}

pub fn wallpaper_sink() -> Box<dyn WallpaperSink> {
    Box::new(SlideshowSink)
}

pub fn lock_screen_sink() -> Box<dyn LockScreenSink> {
    Box::new(WinRtLockScreen)
}

/// Reattaches to the launching console so log lines are echoed there.
pub fn attach_parent_console() -> bool {
    unsafe { AttachConsole(ATTACH_PARENT_PROCESS) }.is_ok()
}
