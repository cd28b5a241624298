use anyhow::Result;
use async_trait::async_trait;
use image::{imageops::FilterType, RgbImage};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::frame::Frame;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: String,            // "libcamera-jpeg" | "v4l2-mjpeg" | "image-file"
    pub device: Option<String>,  // overrides /dev/video{index} (v4l2)
    pub image_path: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub default_index: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: "v4l2-mjpeg".into(),
            device: None,
            image_path: None,
            width: 640,
            height: 480,
            fps: 15,
            default_index: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera device error: {0}")]
    Device(String),
    #[error("frame source is not running")]
    NotRunning,
    #[error("end of stream")]
    EndOfStream,
}

/// Exclusive handle on a capture device.
///
/// `open` on an already open source succeeds without touching the device.
/// `read` after `close` fails with [`CaptureError::NotRunning`].
#[async_trait]
pub trait FrameSource: Send {
    fn name(&self) -> &'static str;
    async fn open(&mut self, device_index: u32) -> Result<(), CaptureError>;
    async fn read(&mut self) -> Result<Frame, CaptureError>;
    async fn close(&mut self);
    fn is_open(&self) -> bool;
}

pub fn source_from_config(cfg: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" | "v4l2-mjpeg" => Ok(Box::new(CommandSource::new(cfg.clone()))),
        "image-file" => {
            let path = cfg.image_path.clone().ok_or_else(|| anyhow::anyhow!("camera.image_path missing"))?;
            Ok(Box::new(ImageFileSource::new(path, cfg.width, cfg.height)))
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

/// Pragmatic capture: one external process per frame.
/// - libcamera-jpeg: `libcamera-still -n -t 1 --camera N --width ... --height ... -o -`
/// - v4l2-mjpeg: `ffmpeg` grabs a single MJPEG frame from /dev/videoN
pub struct CommandSource {
    cfg: CameraConfig,
    device_index: Option<u32>,
    seq: u64,
}

impl CommandSource {
    pub fn new(cfg: CameraConfig) -> Self {
        Self { cfg, device_index: None, seq: 0 }
    }

    fn device_path(&self, index: u32) -> String {
        self.cfg.device.clone().unwrap_or_else(|| format!("/dev/video{}", index))
    }

    async fn capture_jpeg(&self, index: u32) -> Result<Vec<u8>, CaptureError> {
        let mut cmd = match self.cfg.mode.as_str() {
            "libcamera-jpeg" => {
                let mut cmd = Command::new("libcamera-still");
                cmd.args([
                    "-n",
                    "-t", "1",
                    "--camera", &index.to_string(),
                    "--width", &self.cfg.width.to_string(),
                    "--height", &self.cfg.height.to_string(),
                    "-o", "-",
                ]);
                cmd
            }
            _ => {
                let mut cmd = Command::new("ffmpeg");
                cmd.args([
                    "-hide_banner", "-loglevel", "error",
                    "-f", "video4linux2",
                    "-input_format", "mjpeg",
                    "-video_size", &format!("{}x{}", self.cfg.width, self.cfg.height),
                    "-framerate", &self.cfg.fps.to_string(),
                    "-i", &self.device_path(index),
                    "-vframes", "1",
                    "-f", "image2pipe",
                    "-vcodec", "mjpeg",
                    "-",
                ]);
                cmd
            }
        };

        debug!("capture: {} index={}", self.cfg.mode, index);
        let out = cmd
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::Device(format!("spawn capture process: {}", e)))?;
        if !out.status.success() || out.stdout.is_empty() {
            return Err(CaptureError::Device(format!(
                "capture process failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }

    async fn grab(&mut self, index: u32) -> Result<Frame, CaptureError> {
        let jpeg = self.capture_jpeg(index).await?;
        let img = image::load_from_memory(&jpeg)
            .map_err(|e| CaptureError::Device(format!("decode jpeg: {}", e)))?
            .to_rgb8();
        self.seq += 1;
        Ok(Frame::new(normalize(img, self.cfg.width, self.cfg.height), self.seq))
    }
}

#[async_trait]
impl FrameSource for CommandSource {
    fn name(&self) -> &'static str {
        match self.cfg.mode.as_str() {
            "libcamera-jpeg" => "libcamera",
            _ => "v4l2",
        }
    }

    async fn open(&mut self, device_index: u32) -> Result<(), CaptureError> {
        if self.device_index.is_some() {
            return Ok(());
        }
        if self.cfg.mode == "v4l2-mjpeg" {
            let dev = self.device_path(device_index);
            if !Path::new(&dev).exists() {
                return Err(CaptureError::Device(format!("no such device: {}", dev)));
            }
        }
        // Probe: a camera that cannot deliver one frame is not usable.
        self.grab(device_index).await?;
        self.device_index = Some(device_index);
        info!("camera: opened {} index={}", self.name(), device_index);
        Ok(())
    }

    async fn read(&mut self) -> Result<Frame, CaptureError> {
        let index = self.device_index.ok_or(CaptureError::NotRunning)?;
        self.grab(index).await
    }

    async fn close(&mut self) {
        if self.device_index.take().is_some() {
            info!("camera: released {}", self.name());
        }
    }

    fn is_open(&self) -> bool {
        self.device_index.is_some()
    }
}

/// Serves one still image as an endless stream.
pub struct ImageFileSource {
    path: String,
    width: u32,
    height: u32,
    image: Option<RgbImage>,
    seq: u64,
}

impl ImageFileSource {
    pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
        Self { path: path.into(), width, height, image: None, seq: 0 }
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    fn name(&self) -> &'static str {
        "image-file"
    }

    async fn open(&mut self, _device_index: u32) -> Result<(), CaptureError> {
        if self.image.is_some() {
            return Ok(());
        }
        let img = image::open(&self.path)
            .map_err(|e| CaptureError::Device(format!("open {}: {}", self.path, e)))?
            .to_rgb8();
        self.image = Some(normalize(img, self.width, self.height));
        info!("camera: serving still image {}", self.path);
        Ok(())
    }

    async fn read(&mut self) -> Result<Frame, CaptureError> {
        let img = self.image.as_ref().ok_or(CaptureError::NotRunning)?;
        self.seq += 1;
        Ok(Frame::new(img.clone(), self.seq))
    }

    async fn close(&mut self) {
        self.image = None;
    }

    fn is_open(&self) -> bool {
        self.image.is_some()
    }
}

fn normalize(img: RgbImage, width: u32, height: u32) -> RgbImage {
    if width == 0 || height == 0 || img.dimensions() == (width, height) {
        return img;
    }
    image::imageops::resize(&img, width, height, FilterType::Triangle)
}
