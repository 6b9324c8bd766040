use crate::{CaptureRegion, DisplayError, ImageLayout, SharedSegment};
use screen_capture::Rectangle;

/// The root drawable captures are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSurface {
    /// Server-side drawable id
    pub drawable: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u8,
}

impl RootSurface {
    pub fn bounds(&self) -> Rectangle {
        Rectangle::new(0, 0, self.width as i32, self.height as i32)
    }
}

/// Root-relative area of a window, or of `subregion` given relative to the
/// window's top-left corner.
///
/// The subregion is offset only, not clipped to the window.
pub fn window_subregion(window: Rectangle, subregion: Option<Rectangle>) -> CaptureRegion {
    match subregion {
        Some(sub) => Rectangle::new(
            window.x.saturating_add(sub.x),
            window.y.saturating_add(sub.y),
            sub.width,
            sub.height,
        ),
        None => window,
    }
}

/// What a capture session needs from the display server.
///
/// Connecting is not part of the trait; sessions take a connect function so
/// each backend decides how it finds its server.
pub trait DisplayService {
    /// Server-side registration of a shared segment.
    type Attachment: Copy + std::fmt::Debug;

    /// Default root surface with its current size and depth.
    fn root_surface(&self) -> Result<RootSurface, DisplayError>;

    /// Root-relative capture region for `window`, see [`window_subregion`].
    fn window_region(
        &self,
        window: u32,
        subregion: Option<Rectangle>,
    ) -> Result<CaptureRegion, DisplayError>;

    /// Describe a `width × height` ZPixmap image in the default visual and depth.
    fn create_image(&mut self, width: u32, height: u32) -> Result<ImageLayout, DisplayError>;

    /// Release whatever `create_image` set up for `layout`.
    fn destroy_image(&mut self, layout: &ImageLayout) -> Result<(), DisplayError>;

    /// Register `segment` so the server may write into it.
    fn attach(&mut self, segment: &SharedSegment) -> Result<Self::Attachment, DisplayError>;

    fn detach(&mut self, attachment: Self::Attachment) -> Result<(), DisplayError>;

    /// Copy `region` of the root surface into the attached segment.
    ///
    /// Returns only after the server has finished writing.
    fn fetch_image(
        &mut self,
        attachment: Self::Attachment,
        region: &CaptureRegion,
        layout: &ImageLayout,
        segment: &mut SharedSegment,
    ) -> Result<(), DisplayError>;

    /// Flush and close the connection.
    fn close(self) -> Result<(), DisplayError>;
}
