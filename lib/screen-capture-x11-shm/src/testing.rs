//! In-process stand-in for the display server.

use crate::{
    ByteOrder, CaptureRegion, ChannelMasks, DisplayError, DisplayService, ImageLayout,
    RootSurface, SharedSegment, window_subregion,
};
use nix::libc;
use once_cell::sync::Lazy;
use screen_capture::Rectangle;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialise tests that touch process-wide state.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether the System V segment `shmid` still exists in the kernel.
pub(crate) fn sysv_segment_exists(shmid: i32) -> bool {
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) == 0 }
}

/// Packed pixel the fake screen shows at root coordinate `(x, y)`.
pub(crate) fn screen_pixel(x: u32, y: u32) -> u32 {
    ((x & 0xFF) << 16) | ((y & 0xFF) << 8) | ((x + y) & 0xFF)
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Faults {
    pub root_surface: bool,
    pub create_image: bool,
    pub zero_sized_image: bool,
    pub attach: bool,
    pub fetch: bool,
    pub detach: bool,
    pub destroy_image: bool,
    pub close: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeDisplay {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u8,
    pub scanline_pad: u8,
    pub byte_order: ByteOrder,
    pub faults: Faults,

    /// Top-level windows by id, in root coordinates
    pub windows: Vec<(u32, Rectangle)>,

    /// Names of the calls received, in order
    pub journal: Arc<Mutex<Vec<&'static str>>>,

    pub attached: Option<u32>,
    pub next_id: u32,

    /// System V id of the attached segment, if it has one
    pub attached_shmid: Option<i32>,
}

impl Default for FakeDisplay {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            bits_per_pixel: 32,
            scanline_pad: 32,
            byte_order: ByteOrder::LsbFirst,
            faults: Faults::default(),
            windows: vec![],
            journal: Arc::default(),
            attached: None,
            next_id: 1,
            attached_shmid: None,
        }
    }
}

impl FakeDisplay {
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn log(&self, call: &'static str) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn fail(&self, fault: bool, call: &str) -> Result<(), DisplayError> {
        if fault {
            Err(DisplayError::Other(format!("injected {call} failure")))
        } else {
            Ok(())
        }
    }
}

impl DisplayService for FakeDisplay {
    type Attachment = u32;

    fn root_surface(&self) -> Result<RootSurface, DisplayError> {
        self.log("root_surface");
        self.fail(self.faults.root_surface, "root_surface")?;

        Ok(RootSurface {
            drawable: 0x100,
            width: self.width,
            height: self.height,
            depth: 24,
        })
    }

    fn window_region(
        &self,
        window: u32,
        subregion: Option<Rectangle>,
    ) -> Result<CaptureRegion, DisplayError> {
        self.log("window_region");

        let (_, bounds) = self
            .windows
            .iter()
            .find(|(id, _)| *id == window)
            .ok_or_else(|| DisplayError::Other(format!("no window {window:#x}")))?;
        Ok(window_subregion(*bounds, subregion))
    }

    fn create_image(&mut self, width: u32, height: u32) -> Result<ImageLayout, DisplayError> {
        self.log("create_image");
        self.fail(self.faults.create_image, "create_image")?;

        let mut layout = ImageLayout::new(
            width,
            height,
            24,
            self.bits_per_pixel,
            self.scanline_pad,
            self.byte_order,
            ChannelMasks::default(),
        )?;

        if self.faults.zero_sized_image {
            layout.bytes_per_line = 0;
        }

        Ok(layout)
    }

    fn destroy_image(&mut self, _layout: &ImageLayout) -> Result<(), DisplayError> {
        self.log("destroy_image");
        self.fail(self.faults.destroy_image, "destroy_image")
    }

    fn attach(&mut self, segment: &SharedSegment) -> Result<Self::Attachment, DisplayError> {
        self.log("attach");
        self.fail(self.faults.attach, "attach")?;
        assert!(segment.is_mapped());

        let id = self.next_id;
        self.next_id += 1;
        self.attached = Some(id);
        self.attached_shmid = segment.shmid();
        Ok(id)
    }

    fn detach(&mut self, attachment: Self::Attachment) -> Result<(), DisplayError> {
        assert_eq!(self.attached, Some(attachment));
        self.attached = None;

        // The server must let go of the segment before the client releases it.
        if let Some(shmid) = self.attached_shmid.take() {
            if !sysv_segment_exists(shmid) {
                self.log("detach_after_release");
                return Err(DisplayError::Other(format!(
                    "segment {shmid} released before detach"
                )));
            }
        }

        self.log("detach");
        self.fail(self.faults.detach, "detach")
    }

    fn fetch_image(
        &mut self,
        attachment: Self::Attachment,
        region: &CaptureRegion,
        layout: &ImageLayout,
        segment: &mut SharedSegment,
    ) -> Result<(), DisplayError> {
        self.log("fetch_image");
        assert_eq!(self.attached, Some(attachment));
        self.fail(self.faults.fetch, "fetch_image")?;

        let bounds = RootSurface {
            drawable: 0,
            width: self.width,
            height: self.height,
            depth: 24,
        }
        .bounds();
        if !bounds.contains(region) {
            return Err(DisplayError::OutsideDrawable);
        }

        let data = segment.as_mut_slice();
        // Poison the whole segment so padding bytes are recognisable.
        data.fill(0xEE);

        let bytes_per_pixel = layout.bytes_per_pixel();
        for y in 0..layout.height {
            for x in 0..layout.width {
                let pixel = screen_pixel(region.x as u32 + x, region.y as u32 + y);
                let bytes = match layout.byte_order {
                    ByteOrder::LsbFirst => pixel.to_le_bytes(),
                    ByteOrder::MsbFirst => pixel.to_be_bytes(),
                };
                let bytes = match layout.byte_order {
                    ByteOrder::LsbFirst => &bytes[..bytes_per_pixel],
                    ByteOrder::MsbFirst => &bytes[4 - bytes_per_pixel..],
                };

                let offset = layout.offset(x, y);
                data[offset..offset + bytes_per_pixel].copy_from_slice(bytes);
            }
        }

        Ok(())
    }

    fn close(self) -> Result<(), DisplayError> {
        self.log("close");
        self.fail(self.faults.close, "close")
    }
}
