use crate::{
    ByteOrder, CaptureRegion, ChannelMasks, DisplayError, DisplayService, ImageLayout,
    RootSurface, SegmentBacking, SharedSegment, window_subregion,
};
use screen_capture::Rectangle;
use x11rb::{
    connection::{Connection, RequestConnection},
    errors::ReplyError,
    protocol::{
        ErrorKind,
        shm::{self, ConnectionExt as _},
        xproto::{ConnectionExt as _, ImageFormat, ImageOrder, Screen},
    },
    rust_connection::RustConnection,
};

/// MIT-SHM capable connection to the X server named by `$DISPLAY`.
pub struct X11Display {
    conn: RustConnection,
    screen_num: usize,
    shm_version: (u16, u16),
}

impl X11Display {
    pub fn connect() -> Result<Self, DisplayError> {
        let (conn, screen_num) = x11rb::connect(None)?;

        if conn
            .extension_information(shm::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(DisplayError::Unsupported(
                "X server does not support the MIT-SHM extension".to_string(),
            ));
        }

        let version = conn.shm_query_version()?.reply()?;
        log::debug!(
            "connected to X screen {screen_num}, MIT-SHM {}.{}",
            version.major_version,
            version.minor_version
        );

        Ok(Self {
            conn,
            screen_num,
            shm_version: (version.major_version, version.minor_version),
        })
    }

    fn screen(&self) -> Result<&Screen, DisplayError> {
        self.conn
            .setup()
            .roots
            .get(self.screen_num)
            .ok_or_else(|| DisplayError::Other(format!("no X screen {}", self.screen_num)))
    }

    fn supports_fd_passing(&self) -> bool {
        self.shm_version >= (1, 2)
    }
}

impl DisplayService for X11Display {
    type Attachment = shm::Seg;

    fn root_surface(&self) -> Result<RootSurface, DisplayError> {
        let root = self.screen()?.root;

        // The setup block keeps the size from connection time; RandR may
        // have resized the root since.
        let geometry = self.conn.get_geometry(root)?.reply()?;

        Ok(RootSurface {
            drawable: root,
            width: geometry.width as u32,
            height: geometry.height as u32,
            depth: geometry.depth,
        })
    }

    fn window_region(
        &self,
        window: u32,
        subregion: Option<Rectangle>,
    ) -> Result<CaptureRegion, DisplayError> {
        let root = self.screen()?.root;
        let geometry = self.conn.get_geometry(window)?.reply()?;
        let origin = self
            .conn
            .translate_coordinates(window, root, 0, 0)?
            .reply()?;

        let bounds = Rectangle::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geometry.width as i32,
            geometry.height as i32,
        );
        log::debug!("window {window:#x} covers {bounds}");

        Ok(window_subregion(bounds, subregion))
    }

    fn create_image(&mut self, width: u32, height: u32) -> Result<ImageLayout, DisplayError> {
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(DisplayError::Unsupported(format!(
                "image of {width}x{height} exceeds the X protocol limits"
            )));
        }

        let setup = self.conn.setup();
        let screen = self.screen()?;

        let visual = screen
            .allowed_depths
            .iter()
            .filter(|d| d.depth == screen.root_depth)
            .flat_map(|d| d.visuals.iter())
            .find(|v| v.visual_id == screen.root_visual)
            .ok_or_else(|| DisplayError::Other("default visual not found".to_string()))?;

        let format = setup
            .pixmap_formats
            .iter()
            .find(|f| f.depth == screen.root_depth)
            .ok_or_else(|| {
                DisplayError::Unsupported(format!(
                    "no pixmap format for depth {}",
                    screen.root_depth
                ))
            })?;

        let byte_order = if setup.image_byte_order == ImageOrder::MSB_FIRST {
            ByteOrder::MsbFirst
        } else {
            ByteOrder::LsbFirst
        };

        ImageLayout::new(
            width,
            height,
            screen.root_depth,
            format.bits_per_pixel,
            format.scanline_pad,
            byte_order,
            ChannelMasks {
                red: visual.red_mask,
                green: visual.green_mask,
                blue: visual.blue_mask,
            },
        )
    }

    fn destroy_image(&mut self, _layout: &ImageLayout) -> Result<(), DisplayError> {
        // ZPixmap descriptors live on the client only.
        Ok(())
    }

    fn attach(&mut self, segment: &SharedSegment) -> Result<Self::Attachment, DisplayError> {
        let seg = self.conn.generate_id()?;

        match segment.backing() {
            Some(SegmentBacking::SysV) => {
                let shmid = segment
                    .shmid()
                    .ok_or_else(|| DisplayError::Other("segment already removed".to_string()))?;
                self.conn.shm_attach(seg, shmid as u32, false)?.check()?;
            }
            Some(SegmentBacking::Memfd) => {
                if !self.supports_fd_passing() {
                    return Err(DisplayError::Unsupported(format!(
                        "MIT-SHM {}.{} cannot attach file descriptors",
                        self.shm_version.0, self.shm_version.1
                    )));
                }

                let fd = segment
                    .try_clone_fd()
                    .map_err(|e| DisplayError::Other(e.to_string()))?;
                self.conn.shm_attach_fd(seg, fd, false)?.check()?;
            }
            None => return Err(DisplayError::Other("segment already removed".to_string())),
        }

        log::debug!("attached shared segment as {seg:#x}");
        Ok(seg)
    }

    fn detach(&mut self, attachment: Self::Attachment) -> Result<(), DisplayError> {
        self.conn.shm_detach(attachment)?.check()?;
        log::debug!("detached shared segment {attachment:#x}");
        Ok(())
    }

    fn fetch_image(
        &mut self,
        attachment: Self::Attachment,
        region: &CaptureRegion,
        layout: &ImageLayout,
        _segment: &mut SharedSegment,
    ) -> Result<(), DisplayError> {
        let root = self.screen()?.root;
        let x = i16::try_from(region.x).map_err(|_| DisplayError::OutsideDrawable)?;
        let y = i16::try_from(region.y).map_err(|_| DisplayError::OutsideDrawable)?;

        let reply = self
            .conn
            .shm_get_image(
                root,
                x,
                y,
                layout.width as u16,
                layout.height as u16,
                !0,
                ImageFormat::Z_PIXMAP.into(),
                attachment,
                0,
            )?
            .reply()
            .map_err(|e| match e {
                ReplyError::X11Error(ref x) if x.error_kind == ErrorKind::Match => {
                    DisplayError::OutsideDrawable
                }
                e => DisplayError::Reply(e),
            })?;

        if reply.depth != layout.depth {
            return Err(DisplayError::Other(format!(
                "server returned depth {}, expected {}",
                reply.depth, layout.depth
            )));
        }

        Ok(())
    }

    fn close(self) -> Result<(), DisplayError> {
        self.conn.flush()?;
        log::debug!("closed X connection");
        Ok(())
    }
}
