use screen_capture_x11_shm::{CaptureRegion, Session, SessionConfig};

// Usage: capture_region_demo [window-id]
// Captures an 800x600 region of the root, or the whole window when an id such
// as `0x3a00007` (see `xwininfo`) is given.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut session = match std::env::args().nth(1) {
        Some(id) => {
            let window = match id.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16)?,
                None => id.parse()?,
            };
            Session::open_window(window, None, SessionConfig::default())?
        }
        None => Session::open(SessionConfig::new(CaptureRegion::new(0, 0, 800, 600)))?,
    };
    println!(
        "region {} of root surface {:?}",
        session.region(),
        session.surface()
    );

    let frame = session.capture_frame()?;
    println!(
        "captured {}x{} in {:.2?}",
        frame.width,
        frame.height,
        session.last_capture_duration().unwrap_or_default()
    );

    let temp_file = "/tmp/screen-capture-x11-shm-region.png";
    let img = image::RgbImage::from_raw(frame.width, frame.height, frame.pixel_data)
        .ok_or("frame buffer does not match its dimensions")?;
    img.save(temp_file)?;
    println!("Screenshot saved to: {}", temp_file);

    session.teardown()?;
    Ok(())
}
