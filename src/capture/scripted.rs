//! Replay backend driven by a recorded fingertip trace
//!
//! Stands in for a camera plus landmark model: every frame is blank and the
//! fingertip comes from the trace. When the trace runs out the camera
//! reports a read failure, like an unplugged device.
//!
//! Trace file format (JSON):
//!
//! ```json
//! {
//!   "width": 1280, "height": 720, "fps": 30, "cameras": [0],
//!   "steps": [
//!     { "x": 0.32, "y": 0.58, "frames": 100 },
//!     { "frames": 15 }
//!   ]
//! }
//! ```
//!
//! A step without coordinates means no hand in view.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

use super::{
    CaptureRequest, DetectorSettings, FingertipSample, FrameSource, LandmarkProvider,
    VisionBackend,
};

#[derive(Debug, Deserialize)]
struct TraceFile {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default = "default_fps")]
    fps: u32,
    #[serde(default = "default_cameras")]
    cameras: Vec<u32>,
    steps: Vec<TraceStep>,
}

#[derive(Debug, Deserialize)]
struct TraceStep {
    x: Option<f32>,
    y: Option<f32>,
    #[serde(default = "default_frames")]
    frames: u32,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    30
}
fn default_cameras() -> Vec<u32> {
    vec![0]
}
fn default_frames() -> u32 {
    1
}

#[derive(Debug)]
struct Trace {
    width: u32,
    height: u32,
    frame_interval: Duration,
    cameras: Vec<u32>,
    /// One entry per frame
    samples: Vec<Option<(f32, f32)>>,
}

/// Backend replaying a fingertip trace
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    trace: Arc<Trace>,
}

impl ScriptedBackend {
    /// Per-frame samples; `None` frames have no hand in view
    pub fn new(samples: Vec<Option<(f32, f32)>>) -> Self {
        Self {
            trace: Arc::new(Trace {
                width: default_width(),
                height: default_height(),
                frame_interval: Duration::from_secs(1) / default_fps(),
                cameras: default_cameras(),
                samples,
            }),
        }
    }

    /// Load a JSON trace file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read trace {}", path.display()))?;
        let backend = Self::from_json(&raw)
            .with_context(|| format!("invalid trace {}", path.display()))?;
        info!(
            path = %path.display(),
            frames = backend.trace.samples.len(),
            "fingertip trace loaded"
        );
        Ok(backend)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: TraceFile = serde_json::from_str(raw)?;
        anyhow::ensure!(file.fps > 0, "fps must be non-zero");

        let samples = file
            .steps
            .iter()
            .flat_map(|step| {
                let sample = step.x.zip(step.y);
                std::iter::repeat(sample).take(step.frames as usize)
            })
            .collect();

        Ok(Self::new(samples)
            .with_frame_size(file.width, file.height)
            .with_frame_interval(Duration::from_secs(1) / file.fps)
            .with_cameras(file.cameras))
    }

    pub fn with_frame_size(self, width: u32, height: u32) -> Self {
        self.map_trace(|t| Trace { width, height, ..t })
    }

    pub fn with_frame_interval(self, frame_interval: Duration) -> Self {
        self.map_trace(|t| Trace {
            frame_interval,
            ..t
        })
    }

    pub fn with_cameras(self, cameras: Vec<u32>) -> Self {
        self.map_trace(|t| Trace { cameras, ..t })
    }

    fn map_trace(self, f: impl FnOnce(Trace) -> Trace) -> Self {
        let trace = Arc::try_unwrap(self.trace).unwrap_or_else(|shared| Trace {
            width: shared.width,
            height: shared.height,
            frame_interval: shared.frame_interval,
            cameras: shared.cameras.clone(),
            samples: shared.samples.clone(),
        });
        Self {
            trace: Arc::new(f(trace)),
        }
    }
}

impl VisionBackend for ScriptedBackend {
    fn probe(&self, index: u32) -> bool {
        self.trace.cameras.contains(&index)
    }

    fn open_camera(
        &self,
        index: u32,
        request: &CaptureRequest,
    ) -> EngineResult<Box<dyn FrameSource>> {
        if !self.probe(index) {
            return Err(EngineError::CameraOpen {
                index,
                reason: "no such camera in trace".to_string(),
            });
        }
        if (request.width, request.height) != (self.trace.width, self.trace.height) {
            info!(
                requested_width = request.width,
                requested_height = request.height,
                requested_fps = request.fps,
                width = self.trace.width,
                height = self.trace.height,
                "camera delivers a different format than requested"
            );
        }
        debug!(index, "scripted camera opened");
        Ok(Box::new(ScriptedCamera {
            trace: Arc::clone(&self.trace),
            next: 0,
            last_frame: None,
        }))
    }

    fn open_detector(
        &self,
        settings: &DetectorSettings,
    ) -> EngineResult<Box<dyn LandmarkProvider>> {
        debug!(
            max_hands = settings.max_hands,
            static_image_mode = settings.static_image_mode,
            "scripted detector opened"
        );
        Ok(Box::new(ScriptedDetector {
            trace: Arc::clone(&self.trace),
            next: 0,
        }))
    }
}

struct ScriptedCamera {
    trace: Arc<Trace>,
    next: usize,
    last_frame: Option<Instant>,
}

impl FrameSource for ScriptedCamera {
    fn read_frame(&mut self) -> EngineResult<RgbImage> {
        if self.next >= self.trace.samples.len() {
            return Err(EngineError::FrameRead(format!(
                "trace ended after {} frames",
                self.next
            )));
        }

        // Pace frames like a real device
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.trace.frame_interval {
                std::thread::sleep(self.trace.frame_interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
        self.next += 1;

        Ok(RgbImage::new(self.trace.width, self.trace.height))
    }
}

struct ScriptedDetector {
    trace: Arc<Trace>,
    next: usize,
}

impl LandmarkProvider for ScriptedDetector {
    fn detect(
        &mut self,
        _frame: &RgbImage,
        captured_at: Instant,
    ) -> EngineResult<Option<FingertipSample>> {
        let sample = self.trace.samples.get(self.next).copied().flatten();
        self.next += 1;
        Ok(sample.map(|(x, y)| FingertipSample { x, y, captured_at }))
    }
}
