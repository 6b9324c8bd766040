use screen_capture::capture_mean_time;
use screen_capture_x11_shm::{CaptureRegion, SegmentBacking, Session, SessionConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let backing = match std::env::args().nth(1).as_deref() {
        Some("memfd") => SegmentBacking::Memfd,
        _ => SegmentBacking::SysV,
    };

    let config = SessionConfig::new(CaptureRegion::new(0, 0, 1280, 720)).with_backing(backing);
    let mut session = Session::open(config)?;

    match capture_mean_time(&mut session, 100)? {
        Some(stats) => {
            println!("Average time per frame: {:.2?}", stats.mean);
            println!("Average FPS: {:.2}", stats.fps());
            println!("Min time: {:.2?}", stats.min);
            println!("Max time: {:.2?}", stats.max);
            println!("Standard deviation: {:.2?}", stats.std_dev);
        }
        None => println!("Failed to measure capture time"),
    }

    println!(
        "last capture: {}us",
        screen_capture_x11_shm::last_capture_time_us()
    );

    session.teardown()?;
    Ok(())
}
