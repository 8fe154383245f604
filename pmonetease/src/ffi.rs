//! C ABI over [`NeteaseDriver`], for native hosts loading the `cdylib`.
//!
//! A driver handle comes from `pmonetease_driver_new*` and must be released
//! with `pmonetease_driver_free`. Every other entry point accepts a null
//! handle and then does nothing. Callbacks run on the monitor thread; the
//! strings they receive are only valid for the duration of the call.

use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::sync::Arc;

use tracing::warn;

use crate::config::DriverConfig;
use crate::driver::NeteaseDriver;
use crate::state::RawPlaybackState;

pub type TrackChangedFn = extern "C" fn(track_id: *const c_char, user_data: *mut c_void);
pub type LogFn = extern "C" fn(level: *const c_char, message: *const c_char, user_data: *mut c_void);

/// Opaque pointer supplied by the host along with a callback.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: the host registering a callback promises that its user data may be
// used from the monitor thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

// Interior NUL bytes cannot cross the boundary.
fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', " ")).unwrap_or_default()
}

fn as_driver<'a>(driver: *const NeteaseDriver) -> Option<&'a NeteaseDriver> {
    // SAFETY: non-null handles come from pmonetease_driver_new*.
    unsafe { driver.as_ref() }
}

/// Driver with the default settings.
#[unsafe(no_mangle)]
pub extern "C" fn pmonetease_driver_new() -> *mut NeteaseDriver {
    Box::into_raw(Box::new(NeteaseDriver::new(DriverConfig::default())))
}

/// Driver configured from the `config.yaml` in `config_dir`
/// (created with defaults when missing). Returns null when the directory or
/// the file cannot be used.
///
/// # Safety
///
/// `config_dir` is null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_new_with_config_dir(
    config_dir: *const c_char,
) -> *mut NeteaseDriver {
    if config_dir.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: checked non-null, NUL-terminated per the contract above.
    let dir = unsafe { CStr::from_ptr(config_dir) }.to_string_lossy();

    match pmoconfig::Config::load_config(&dir) {
        Ok(config) => {
            let config = DriverConfig::from_config(&config);
            Box::into_raw(Box::new(NeteaseDriver::new(config)))
        }
        Err(err) => {
            warn!(error = %err, dir = %dir, "Cannot load configuration");
            ptr::null_mut()
        }
    }
}

/// Disconnects and releases the driver.
///
/// # Safety
///
/// `driver` is null or a handle not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_free(driver: *mut NeteaseDriver) {
    if driver.is_null() {
        return;
    }
    // SAFETY: allocated by Box::into_raw in pmonetease_driver_new*.
    drop(unsafe { Box::from_raw(driver) });
}

/// See [`NeteaseDriver::connect`].
///
/// # Safety
///
/// `driver` is null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_connect(driver: *const NeteaseDriver, port: u16) -> bool {
    as_driver(driver).is_some_and(|d| d.connect(port))
}

/// # Safety
///
/// `driver` is null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_disconnect(driver: *const NeteaseDriver) {
    if let Some(driver) = as_driver(driver) {
        driver.disconnect();
    }
}

/// # Safety
///
/// `driver` is null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_is_connected(driver: *const NeteaseDriver) -> bool {
    as_driver(driver).is_some_and(|d| d.connection_state() == crate::ConnectionState::Connected)
}

/// Copies the latest snapshot into `out`. Returns false, leaving `out`
/// untouched, when either pointer is null.
///
/// # Safety
///
/// `driver` is null or a live handle; `out` is null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_get_state(
    driver: *const NeteaseDriver,
    out: *mut RawPlaybackState,
) -> bool {
    let Some(driver) = as_driver(driver) else {
        return false;
    };
    if out.is_null() {
        return false;
    }
    // SAFETY: checked non-null, writable per the contract above.
    unsafe { out.write(driver.raw_state()) };
    true
}

/// Installs or, with a null `callback`, removes the track change callback.
///
/// # Safety
///
/// `driver` is null or a live handle; `user_data` stays valid as long as the
/// callback is installed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_set_track_changed_callback(
    driver: *const NeteaseDriver,
    callback: Option<TrackChangedFn>,
    user_data: *mut c_void,
) {
    let Some(driver) = as_driver(driver) else {
        return;
    };
    let user_data = UserData(user_data);
    driver.set_track_changed_callback(callback.map(|callback| {
        Arc::new(move |track_id: &str| {
            let user_data = user_data;
            let track_id = to_c_string(track_id);
            callback(track_id.as_ptr(), user_data.0);
        }) as crate::TrackChangedCallback
    }));
}

/// Installs or, with a null `callback`, removes the log callback.
///
/// # Safety
///
/// Same as [`pmonetease_driver_set_track_changed_callback`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pmonetease_driver_set_log_callback(
    driver: *const NeteaseDriver,
    callback: Option<LogFn>,
    user_data: *mut c_void,
) {
    let Some(driver) = as_driver(driver) else {
        return;
    };
    let user_data = UserData(user_data);
    driver.set_log_callback(callback.map(|callback| {
        Arc::new(move |level: &str, message: &str| {
            let user_data = user_data;
            let level = to_c_string(level);
            let message = to_c_string(message);
            callback(level.as_ptr(), message.as_ptr(), user_data.0);
        }) as crate::LogCallback
    }));
}
