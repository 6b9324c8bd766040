use crate::{FrameCapture, Rectangle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,

    /// Raw pixel data in RGB format, row-major, no row padding
    pub pixel_data: Vec<u8>,
}

impl Frame {
    /// A zeroed frame sized for `region`.
    pub fn for_region(region: &Rectangle) -> Self {
        Self {
            width: region.width.max(0) as u32,
            height: region.height.max(0) as u32,
            pixel_data: vec![0; region.frame_len()],
        }
    }

    /// RGB triple at `(x, y)`, if inside the frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let index = (y as usize * self.width as usize + x as usize) * 3;
        self.pixel_data
            .get(index..index + 3)
            .map(|px| [px[0], px[1], px[2]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
    /// Number of frames measured
    pub frames: u32,

    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,

    /// Population standard deviation of the per-frame time
    pub std_dev: Duration,
}

impl CaptureStats {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len() as f64;
        let secs = samples.iter().map(Duration::as_secs_f64);
        let mean = secs.clone().sum::<f64>() / count;
        let variance = secs.map(|s| (s - mean).powi(2)).sum::<f64>() / count;

        Some(Self {
            frames: samples.len() as u32,
            mean: Duration::from_secs_f64(mean),
            min: samples.iter().min().copied().unwrap_or_default(),
            max: samples.iter().max().copied().unwrap_or_default(),
            std_dev: Duration::from_secs_f64(variance.sqrt()),
        })
    }

    pub fn fps(&self) -> f64 {
        let secs = self.mean.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

/// Capture `counts` frames back to back and summarise the per-frame time.
///
/// Each sample is the capturer's own measurement when it reports one,
/// otherwise the wall time of the `capture_into` call. Returns `Ok(None)`
/// when `counts` is zero.
pub fn capture_mean_time<C: FrameCapture>(
    capturer: &mut C,
    counts: u32,
) -> Result<Option<CaptureStats>, C::Error> {
    let mut buffer = vec![0; capturer.region().frame_len()];
    let mut samples = Vec::with_capacity(counts as usize);

    for _ in 0..counts {
        let start = Instant::now();
        capturer.capture_into(&mut buffer)?;
        let elapsed = start.elapsed();

        samples.push(capturer.last_capture_time().unwrap_or(elapsed));
    }

    Ok(CaptureStats::from_samples(&samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("scripted failure")]
    struct ScriptedError;

    struct ScriptedCapture {
        region: Rectangle,
        times: Vec<Duration>,
        calls: usize,
        fail_at: Option<usize>,
    }

    impl FrameCapture for ScriptedCapture {
        type Error = ScriptedError;

        fn region(&self) -> Rectangle {
            self.region
        }

        fn capture_into(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
            if self.fail_at == Some(self.calls) {
                return Err(ScriptedError);
            }

            assert_eq!(buffer.len(), self.region.frame_len());
            buffer.fill(self.calls as u8);
            self.calls += 1;
            Ok(())
        }

        fn last_capture_time(&self) -> Option<Duration> {
            self.calls.checked_sub(1).map(|i| self.times[i])
        }
    }

    fn scripted(times: &[u64], fail_at: Option<usize>) -> ScriptedCapture {
        ScriptedCapture {
            region: Rectangle::new(0, 0, 4, 2),
            times: times.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            calls: 0,
            fail_at,
        }
    }

    #[test]
    fn test_capture_mean_time_stats() {
        let mut capturer = scripted(&[2, 4, 4, 4, 5, 5, 7, 9], None);
        let stats = capture_mean_time(&mut capturer, 8).unwrap().unwrap();

        assert_eq!(stats.frames, 8);
        assert_eq!(stats.min, Duration::from_millis(2));
        assert_eq!(stats.max, Duration::from_millis(9));
        assert!((stats.mean.as_secs_f64() - 0.005).abs() < 1e-9);
        assert!((stats.std_dev.as_secs_f64() - 0.002).abs() < 1e-9);
        assert!((stats.fps() - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_capture_mean_time_zero_counts() {
        let mut capturer = scripted(&[], None);
        assert!(capture_mean_time(&mut capturer, 0).unwrap().is_none());
        assert_eq!(capturer.calls, 0);
    }

    #[test]
    fn test_capture_mean_time_propagates_error() {
        let mut capturer = scripted(&[1, 1, 1], Some(1));
        assert!(capture_mean_time(&mut capturer, 3).is_err());
        assert_eq!(capturer.calls, 1);
    }

    #[test]
    fn test_frame_rgb_at() {
        let mut frame = Frame::for_region(&Rectangle::new(0, 0, 2, 2));
        assert_eq!(frame.pixel_data.len(), 12);

        frame.pixel_data[9..12].copy_from_slice(&[1, 2, 3]);
        assert_eq!(frame.rgb_at(1, 1), Some([1, 2, 3]));
        assert_eq!(frame.rgb_at(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.rgb_at(2, 0), None);
    }
}
