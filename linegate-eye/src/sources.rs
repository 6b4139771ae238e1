//! Frame source implementations

use crate::error::VisionError;
use crate::frame::{FrameSource, RawFrame};
use async_trait::async_trait;
use bytes::Bytes;
use linegate_core::SourceConfig;
use std::time::Duration;
use tracing::debug;

fn interval_for(fps: f64) -> Duration {
    let fps = if fps.is_finite() { fps.max(SourceConfig::MIN_FPS) } else { 1.0 };
    Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::from_secs(1))
}

/// Build the source a camera is configured with
pub fn source_from_config(config: &SourceConfig) -> Result<Box<dyn FrameSource>, VisionError> {
    match config {
        SourceConfig::Replay { width, height, fps } => {
            Ok(Box::new(ReplaySource::new(*width, *height, *fps)))
        }
        SourceConfig::HttpSnapshot {
            url,
            username,
            password,
            fps,
            timeout_ms,
        } => {
            let mut source = HttpSnapshotSource::new(url, *fps, Duration::from_millis(*timeout_ms))?;
            if let Some(user) = username {
                source = source.with_basic_auth(user, password.clone());
            }
            Ok(Box::new(source))
        }
    }
}

/// Blank frames at a fixed rate.
///
/// Paired with a replay detector this drives the whole pipeline without
/// cameras attached.
pub struct ReplaySource {
    width: u32,
    height: u32,
    interval: Duration,
    data: Bytes,
}

impl ReplaySource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            interval: interval_for(fps),
            data: Bytes::from(vec![0u8; width as usize * height as usize * 3]),
        }
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay {}x{}", self.width, self.height)
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, VisionError> {
        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            // Bytes clones share the allocation
            data: self.data.clone(),
        }))
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }
}

/// JPEG/PNG snapshots over HTTP, as exposed by most IP cameras
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, Option<String>)>,
    interval: Duration,
}

impl HttpSnapshotSource {
    pub fn new(url: &str, fps: f64, timeout: Duration) -> Result<Self, VisionError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| VisionError::Config(format!("invalid snapshot URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(VisionError::Config(format!(
                "unsupported snapshot URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            auth: None,
            interval: interval_for(fps),
        })
    }

    pub fn with_basic_auth(mut self, username: &str, password: Option<String>) -> Self {
        self.auth = Some((username.to_string(), password));
        self
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        format!("HTTP snapshot {}", self.url)
    }

    async fn next_frame(&mut self) -> Result<Option<RawFrame>, VisionError> {
        let mut request = self.client.get(&self.url);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;
        if body.is_empty() {
            debug!("Empty snapshot from {}", self.url);
            return Ok(None);
        }

        decode_bgr(&body).map(Some)
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }
}

/// Decode an encoded image into packed BGR8
pub fn decode_bgr(encoded: &[u8]) -> Result<RawFrame, VisionError> {
    let rgb = image::load_from_memory(encoded)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut data = rgb.into_raw();
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
    Ok(RawFrame {
        width,
        height,
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[tokio::test]
    async fn test_replay_source() {
        let mut source = ReplaySource::new(4, 3, 20.0);
        assert_eq!(source.frame_interval(), Duration::from_millis(50));
        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 36);
    }

    #[test]
    fn test_interval_for_extreme_rates() {
        assert_eq!(interval_for(1e-300), Duration::from_secs(100));
        assert_eq!(interval_for(f64::NAN), Duration::from_secs(1));
        assert_eq!(interval_for(-5.0), Duration::from_secs(100));
        assert!(interval_for(1e12) < Duration::from_micros(1));
    }

    #[test]
    fn test_decode_bgr_swaps_channels() {
        let image = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));
        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut encoded, ImageOutputFormat::Png)
            .unwrap();

        let frame = decode_bgr(encoded.get_ref()).unwrap();
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(&frame.data[..], &[30, 20, 10, 30, 20, 10]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_bgr(b"not an image"), Err(VisionError::Image(_))));
    }

    #[test]
    fn test_http_source_rejects_bad_url() {
        assert!(HttpSnapshotSource::new("ftp://cam/snap.jpg", 5.0, Duration::from_secs(1)).is_err());
        assert!(HttpSnapshotSource::new("not a url", 5.0, Duration::from_secs(1)).is_err());
        assert!(HttpSnapshotSource::new("http://10.0.0.9/snap.jpg", 5.0, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_source_from_config() {
        let source = source_from_config(&SourceConfig::default()).unwrap();
        assert!(source.describe().starts_with("replay"));
    }
}
