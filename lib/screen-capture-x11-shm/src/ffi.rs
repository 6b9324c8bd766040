//! C interface over a single process-wide session.
//!
//! Status codes: `0` success; from `init_capture`, `-1` connection, `-2` image
//! descriptor or invalid region, `-3` shared memory, `-4` attach, `-5` already
//! initialised; from `capture_frame`, `-1` no session or null buffer, `-3`
//! region out of bounds, `-4` fetch failed.

use crate::{
    CaptureError, CaptureRegion, DisplayError, DisplayService, InitError, Session, SessionConfig,
    X11Display, timing,
};
use once_cell::sync::Lazy;
use std::{
    os::raw::{c_int, c_long},
    sync::{Mutex, PoisonError},
};

static SESSION: Lazy<Mutex<Option<Session<X11Display>>>> = Lazy::new(|| Mutex::new(None));

fn open_in<D: DisplayService>(
    slot: &Mutex<Option<Session<D>>>,
    config: SessionConfig,
    connect: impl FnOnce() -> Result<D, DisplayError>,
) -> Result<(), InitError> {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(InitError::AlreadyInitialized);
    }

    *slot = Some(Session::open_with(config, connect)?);
    Ok(())
}

fn capture_in<'a, D: DisplayService>(
    slot: &Mutex<Option<Session<D>>>,
    out: impl FnOnce(usize) -> Option<&'a mut [u8]>,
) -> Result<(), CaptureError> {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    let session = slot.as_mut().ok_or(CaptureError::NotInitialized)?;
    let buffer = out(session.frame_len()).ok_or(CaptureError::NullBuffer)?;
    session.capture(buffer)
}

fn close_in<D: DisplayService>(slot: &Mutex<Option<Session<D>>>) {
    let session = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(session) = session {
        if let Err(e) = session.teardown() {
            log::warn!("close_capture: {e}");
        }
    }
}

/// Open the process-wide session for the given region of the default screen.
#[unsafe(no_mangle)]
pub extern "C" fn init_capture(x: c_int, y: c_int, width: c_int, height: c_int) -> c_int {
    let config = SessionConfig::new(CaptureRegion::new(x, y, width, height));
    match open_in(&SESSION, config, X11Display::connect) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("init_capture: {e}");
            e.code()
        }
    }
}

/// Capture one frame into `data`.
///
/// # Safety
///
/// `data` must be null or valid for writes of `width * height * 3` bytes, for
/// the region passed to [`init_capture`], and not aliased during the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn capture_frame(data: *mut u8) -> c_int {
    let result = capture_in(&SESSION, |len| {
        if data.is_null() {
            None
        } else {
            // SAFETY: upheld by the caller as documented above.
            Some(unsafe { std::slice::from_raw_parts_mut(data, len) })
        }
    });

    match result {
        Ok(()) => 0,
        Err(e @ CaptureError::NullBuffer) => {
            log::warn!("capture_frame: {e}");
            e.code()
        }
        Err(e) => {
            log::debug!("capture_frame: {e}");
            e.code()
        }
    }
}

/// Microseconds taken by the last successful capture, 0 before the first.
#[unsafe(no_mangle)]
pub extern "C" fn get_last_capture_time_us() -> c_long {
    c_long::try_from(timing::last_capture_time_us()).unwrap_or(c_long::MAX)
}

/// Release the process-wide session. Safe to call any number of times.
#[unsafe(no_mangle)]
pub extern "C" fn close_capture() {
    close_in(&SESSION);
}
