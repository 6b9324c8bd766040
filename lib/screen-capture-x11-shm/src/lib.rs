//! Low-latency capture of a screen region over X11 MIT-SHM.
//!
//! A [`Session`] owns the X connection, an image descriptor and the shared
//! memory segment the server writes into. Every [`Session::capture`] fetches a
//! fresh frame into that segment and unpacks it into a caller-owned buffer of
//! tightly packed R, G, B bytes.
//!
//! ```no_run
//! use screen_capture_x11_shm::{CaptureRegion, Session, SessionConfig};
//!
//! let region = CaptureRegion::new(0, 0, 640, 480);
//! let mut session = Session::open(SessionConfig::new(region))?;
//!
//! let mut rgb = vec![0; session.frame_len()];
//! session.capture(&mut rgb)?;
//! println!("captured in {:?}", session.last_capture_duration());
//!
//! session.teardown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The crate also builds as a `cdylib` exposing `init_capture`,
//! `capture_frame`, `get_last_capture_time_us` and `close_capture`.

#[macro_use]
extern crate derivative;

mod display;
mod error;
mod ffi;
mod segment;
mod session;
mod shm_image;
mod timing;
mod x11;

#[cfg(test)]
mod testing;

pub use display::*;
pub use error::*;
pub use ffi::*;
pub use segment::*;
pub use session::*;
pub use shm_image::*;
pub use timing::*;
pub use x11::*;
