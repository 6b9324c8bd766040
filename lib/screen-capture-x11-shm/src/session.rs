use crate::{
    CaptureError, DisplayError, DisplayService, InitError, RootSurface, SegmentBacking, ShmImage,
    TeardownError, TeardownStep, X11Display,
    timing::{self, Stopwatch},
};
use derive_setters::Setters;
use screen_capture::{Frame, FrameCapture, Rectangle};
use std::time::Duration;

/// Rectangle of the root surface sampled on every capture.
pub type CaptureRegion = Rectangle;

#[derive(Debug, Clone, Derivative, Setters)]
#[derivative(Default)]
#[setters(prefix = "with_")]
#[non_exhaustive]
pub struct SessionConfig {
    /// Region to capture, fixed for the lifetime of the session
    pub region: CaptureRegion,

    /// Kernel object used for the shared image
    pub backing: SegmentBacking,

    /// Reject regions outside the root surface before asking the server.
    ///
    /// The check uses the last root size read. A region that falls outside
    /// it makes the session re-read the root size once before rejecting, so a
    /// screen that grew since init is picked up.
    #[derivative(Default(value = "true"))]
    pub validate_bounds: bool,
}

impl SessionConfig {
    pub fn new(region: CaptureRegion) -> Self {
        Self::default().with_region(region)
    }
}

/// An open capture session: display connection, shared image and region.
///
/// Resources are released in reverse order of acquisition by
/// [`teardown`](Self::teardown), or on drop.
pub struct Session<D: DisplayService> {
    region: CaptureRegion,
    surface: RootSurface,
    validate_bounds: bool,
    display: Option<D>,
    image: Option<ShmImage>,
    attachment: Option<D::Attachment>,
    last_capture: Option<Duration>,
}

impl Session<X11Display> {
    /// Open a session on the X server named by `$DISPLAY`.
    pub fn open(config: SessionConfig) -> Result<Self, InitError> {
        Self::open_with(config, X11Display::connect)
    }

    /// Open a session on `window`, or on `subregion` of it, on the X server
    /// named by `$DISPLAY`. See [`open_window_with`](Self::open_window_with).
    pub fn open_window(
        window: u32,
        subregion: Option<Rectangle>,
        config: SessionConfig,
    ) -> Result<Self, InitError> {
        Self::open_window_with(window, subregion, config, X11Display::connect)
    }
}

impl<D: DisplayService> Session<D> {
    /// Open a session on the display returned by `connect`.
    ///
    /// A failure at any step releases everything acquired before it.
    pub fn open_with(
        config: SessionConfig,
        connect: impl FnOnce() -> Result<D, DisplayError>,
    ) -> Result<Self, InitError> {
        let region = config.region;
        if region.is_empty() {
            return Err(InitError::InvalidRegion(region));
        }

        let display = connect().map_err(InitError::Connection)?;
        let surface = match display.root_surface() {
            Ok(surface) => surface,
            Err(e) => {
                if let Err(e) = display.close() {
                    log::warn!("close connection after failed init: {e}");
                }
                return Err(InitError::Connection(e));
            }
        };

        let mut session = Self {
            region,
            surface,
            validate_bounds: config.validate_bounds,
            display: Some(display),
            image: None,
            attachment: None,
            last_capture: None,
        };

        if let Err(e) = session.acquire(config.backing) {
            if let Err(te) = session.release() {
                log::warn!("rollback after failed init: {te}");
            }
            return Err(e);
        }

        log::info!("capture session opened for region {region}");
        Ok(session)
    }

    /// Open a session on the current screen area of `window`.
    ///
    /// `subregion` is relative to the window's top-left corner. The window
    /// position is resolved once; `config.region` is replaced with the result
    /// and does not follow the window afterwards.
    pub fn open_window_with(
        window: u32,
        subregion: Option<Rectangle>,
        config: SessionConfig,
        connect: impl FnOnce() -> Result<D, DisplayError>,
    ) -> Result<Self, InitError> {
        let display = connect().map_err(InitError::Connection)?;

        let region = match display.window_region(window, subregion) {
            Ok(region) if !region.is_empty() => Ok(region),
            Ok(region) => Err(InitError::InvalidRegion(region)),
            Err(e) => Err(InitError::WindowLookup(window, e)),
        };
        let region = match region {
            Ok(region) => region,
            Err(e) => {
                if let Err(e) = display.close() {
                    log::warn!("close connection after failed window lookup: {e}");
                }
                return Err(e);
            }
        };

        log::debug!("window {window:#x} resolved to capture region {region}");
        Self::open_with(config.with_region(region), move || Ok(display))
    }

    fn acquire(&mut self, backing: SegmentBacking) -> Result<(), InitError> {
        let Some(display) = self.display.as_mut() else {
            return Err(InitError::Connection(DisplayError::Other(
                "display connection is closed".to_string(),
            )));
        };

        let layout = display
            .create_image(self.region.width as u32, self.region.height as u32)
            .map_err(InitError::ImageCreation)?;

        let image = match ShmImage::allocate(layout, backing) {
            Ok(image) => image,
            Err(e) => {
                if let Err(e) = display.destroy_image(&layout) {
                    log::warn!("destroy image after failed allocation: {e}");
                }
                return Err(InitError::SharedMemory(e));
            }
        };
        let image = self.image.insert(image);

        let attachment = display
            .attach(image.segment())
            .map_err(InitError::Attach)?;
        self.attachment = Some(attachment);

        Ok(())
    }

    /// Release every resource still held, running all steps even when some fail.
    fn release(&mut self) -> Result<(), TeardownError> {
        let mut errors = TeardownError::default();

        if let (Some(display), Some(attachment)) = (self.display.as_mut(), self.attachment.take()) {
            if let Err(e) = display.detach(attachment) {
                errors.record(TeardownStep::Detach, e);
            }
        }

        if let Some(mut image) = self.image.take() {
            if let Some(display) = self.display.as_mut() {
                if let Err(e) = display.destroy_image(image.layout()) {
                    errors.record(TeardownStep::DestroyImage, e);
                }
            }

            if let Err(e) = image.segment_mut().unmap() {
                errors.record(TeardownStep::UnmapSegment, e);
            }

            if let Err(e) = image.segment_mut().remove() {
                errors.record(TeardownStep::RemoveSegment, e);
            }
        }

        if let Some(display) = self.display.take() {
            if let Err(e) = display.close() {
                errors.record(TeardownStep::CloseConnection, e);
            }
        }

        errors.into_result()
    }

    /// Release the session. Every step runs; failures come back together.
    pub fn teardown(mut self) -> Result<(), TeardownError> {
        let result = self.release();
        log::info!("capture session closed for region {}", self.region);
        result
    }

    pub fn region(&self) -> CaptureRegion {
        self.region
    }

    /// Root surface as last read, at init or by [`refresh_surface`](Self::refresh_surface).
    pub fn surface(&self) -> RootSurface {
        self.surface
    }

    /// Re-read the root surface, e.g. after the screen was resized.
    pub fn refresh_surface(&mut self) -> Result<RootSurface, CaptureError> {
        let display = self.display.as_ref().ok_or(CaptureError::NotInitialized)?;
        self.surface = display.root_surface().map_err(CaptureError::Fetch)?;
        Ok(self.surface)
    }

    pub fn image(&self) -> Option<&ShmImage> {
        self.image.as_ref()
    }

    /// Bytes a frame of this session occupies.
    pub fn frame_len(&self) -> usize {
        self.region.frame_len()
    }

    /// Duration of the most recent successful [`capture`](Self::capture).
    pub fn last_capture_duration(&self) -> Option<Duration> {
        self.last_capture
    }

    /// Fetch the region and write it into `out` as tightly packed R, G, B bytes.
    ///
    /// Only the first [`frame_len`](Self::frame_len) bytes of `out` are written.
    /// The recorded duration covers the server fetch and the unpack loop.
    pub fn capture(&mut self, out: &mut [u8]) -> Result<(), CaptureError> {
        let expected = self.region.frame_len();
        if out.len() < expected {
            return Err(CaptureError::BufferTooSmall {
                expected,
                actual: out.len(),
            });
        }

        if self.validate_bounds && !self.surface.bounds().contains(&self.region) {
            let surface = self.refresh_surface()?.bounds();
            if !surface.contains(&self.region) {
                return Err(CaptureError::RegionOutOfBounds {
                    region: self.region,
                    surface,
                });
            }
            log::debug!("root surface grew to {surface}, region {} fits", self.region);
        }
        let surface = self.surface.bounds();

        let (Some(display), Some(image), Some(attachment)) =
            (self.display.as_mut(), self.image.as_mut(), self.attachment)
        else {
            return Err(CaptureError::NotInitialized);
        };

        let stopwatch = Stopwatch::start();

        let layout = *image.layout();
        display
            .fetch_image(attachment, &self.region, &layout, image.segment_mut())
            .map_err(|e| match e {
                DisplayError::OutsideDrawable => CaptureError::RegionOutOfBounds {
                    region: self.region,
                    surface,
                },
                e => CaptureError::Fetch(e),
            })?;

        image.write_rgb(&mut out[..expected])?;

        let elapsed = stopwatch.elapsed();
        self.last_capture = Some(elapsed);
        timing::record_capture_time(elapsed);

        Ok(())
    }

    /// Capture into a freshly allocated [`Frame`].
    pub fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut frame = Frame::for_region(&self.region);
        self.capture(&mut frame.pixel_data)?;
        Ok(frame)
    }
}

impl<D: DisplayService> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("release capture session on drop: {e}");
        }
    }
}

impl<D: DisplayService> FrameCapture for Session<D> {
    type Error = CaptureError;

    fn region(&self) -> Rectangle {
        self.region
    }

    fn capture_into(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.capture(buffer)
    }

    fn last_capture_time(&self) -> Option<Duration> {
        self.last_capture
    }
}

impl<D: DisplayService> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("region", &self.region)
            .field("surface", &self.surface)
            .field("image", &self.image)
            .field("attachment", &self.attachment)
            .field("last_capture", &self.last_capture)
            .finish()
    }
}
