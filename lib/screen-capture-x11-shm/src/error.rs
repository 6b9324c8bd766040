use screen_capture::Rectangle;
use std::fmt;

/// Failures reported by the display collaborator.
#[derive(thiserror::Error, Debug)]
pub enum DisplayError {
    #[error("failed to connect to the X server")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("X connection error")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X request failed")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("failed to allocate an X resource id")]
    ReplyOrId(#[from] x11rb::errors::ReplyOrIdError),

    #[error("requested area lies outside the drawable")]
    OutsideDrawable,

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open the display connection")]
    Connection(#[source] DisplayError),

    #[error("invalid capture region `{0}`")]
    InvalidRegion(Rectangle),

    #[error("failed to look up window {0:#x}")]
    WindowLookup(u32, #[source] DisplayError),

    #[error("failed to create the shared image descriptor")]
    ImageCreation(#[source] DisplayError),

    #[error("failed to allocate the shared memory segment")]
    SharedMemory(#[source] std::io::Error),

    #[error("display server refused the shared memory segment")]
    Attach(#[source] DisplayError),

    #[error("a capture session is already active")]
    AlreadyInitialized,
}

impl InitError {
    /// Status code reported through the C interface.
    pub fn code(&self) -> i32 {
        match self {
            Self::Connection(_) => -1,
            Self::InvalidRegion(_) | Self::WindowLookup(..) | Self::ImageCreation(_) => -2,
            Self::SharedMemory(_) => -3,
            Self::Attach(_) => -4,
            Self::AlreadyInitialized => -5,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("no capture session is active")]
    NotInitialized,

    #[error("output buffer pointer is null")]
    NullBuffer,

    #[error("output buffer holds {actual} bytes, frame needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("capture region `{region}` is not inside the display surface `{surface}`")]
    RegionOutOfBounds { region: Rectangle, surface: Rectangle },

    #[error("failed to fetch the image from the display server")]
    Fetch(#[source] DisplayError),
}

impl CaptureError {
    /// Status code reported through the C interface.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotInitialized | Self::NullBuffer => -1,
            Self::BufferTooSmall { .. } => -2,
            Self::RegionOutOfBounds { .. } => -3,
            Self::Fetch(_) => -4,
        }
    }
}

/// Release steps, in the order teardown runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Detach,
    DestroyImage,
    UnmapSegment,
    RemoveSegment,
    CloseConnection,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detach => "detach segment",
            Self::DestroyImage => "destroy image",
            Self::UnmapSegment => "unmap segment",
            Self::RemoveSegment => "remove segment",
            Self::CloseConnection => "close connection",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub message: String,
}

/// Every step that failed while releasing a session. Remaining steps still ran.
#[derive(thiserror::Error, Debug, Default)]
#[error("{} teardown step(s) failed: {}", .failures.len(), summary(.failures))]
pub struct TeardownError {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownError {
    pub(crate) fn record(&mut self, step: TeardownStep, err: impl fmt::Display) {
        let message = err.to_string();
        log::warn!("{step} failed: {message}");
        self.failures.push(TeardownFailure { step, message });
    }

    pub fn steps(&self) -> Vec<TeardownStep> {
        self.failures.iter().map(|f| f.step).collect()
    }

    pub(crate) fn into_result(self) -> Result<(), Self> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn summary(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.step, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}
