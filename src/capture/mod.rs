//! Camera capture and the real-time typing loop
//!
//! Cameras and hand-landmark models are external; they plug in through
//! [`VisionBackend`]. Each session runs on its own thread and owns all of
//! its state.

mod frame_loop;
mod manager;
mod scripted;
mod session;

use std::time::Instant;

use image::RgbImage;
use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

pub use manager::SessionManager;
pub use scripted::ScriptedBackend;
pub use session::CaptureSession;

/// Index fingertip position for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FingertipSample {
    /// Normalized [0,1] horizontal position
    pub x: f32,
    /// Normalized [0,1] vertical position
    pub y: f32,
    pub captured_at: Instant,
}

/// Capture format asked of the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Hand-landmark detector settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub max_hands: u32,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    /// Detect from scratch on every frame instead of tracking
    pub static_image_mode: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            max_hands: 1,
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            static_image_mode: false,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_hands == 0 {
            return Err(EngineError::Configuration(
                "detector must track at least one hand".to_string(),
            ));
        }
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// An open camera
pub trait FrameSource: Send {
    /// Block until the next frame arrives
    fn read_frame(&mut self) -> EngineResult<RgbImage>;
}

/// An open hand-landmark detector
pub trait LandmarkProvider: Send {
    /// Index fingertip of the first hand in `frame`, if any
    fn detect(
        &mut self,
        frame: &RgbImage,
        captured_at: Instant,
    ) -> EngineResult<Option<FingertipSample>>;
}

/// Source of cameras and detectors.
///
/// Handles returned here are released when dropped.
pub trait VisionBackend: Send + Sync + 'static {
    /// Whether camera `index` can be opened
    fn probe(&self, index: u32) -> bool;

    fn open_camera(
        &self,
        index: u32,
        request: &CaptureRequest,
    ) -> EngineResult<Box<dyn FrameSource>>;

    fn open_detector(
        &self,
        settings: &DetectorSettings,
    ) -> EngineResult<Box<dyn LandmarkProvider>>;
}

/// Backend used when no camera integration is configured
#[derive(Debug, Default)]
pub struct NoCameraBackend;

impl VisionBackend for NoCameraBackend {
    fn probe(&self, _index: u32) -> bool {
        false
    }

    fn open_camera(
        &self,
        index: u32,
        _request: &CaptureRequest,
    ) -> EngineResult<Box<dyn FrameSource>> {
        Err(EngineError::CameraOpen {
            index,
            reason: "no camera backend configured".to_string(),
        })
    }

    fn open_detector(
        &self,
        _settings: &DetectorSettings,
    ) -> EngineResult<Box<dyn LandmarkProvider>> {
        Err(EngineError::Processing(
            "no landmark detector configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.max_hands, 1);
        assert_eq!(settings.min_detection_confidence, 0.7);
        assert_eq!(settings.min_tracking_confidence, 0.5);
        assert!(!settings.static_image_mode);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_detector_rejects_out_of_range_confidence() {
        let settings = DetectorSettings {
            min_detection_confidence: 1.5,
            ..DetectorSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_no_camera_backend() {
        let backend = NoCameraBackend;
        assert!(!backend.probe(0));
        let request = CaptureRequest {
            width: 1280,
            height: 720,
            fps: 30,
        };
        assert!(matches!(
            backend.open_camera(0, &request),
            Err(EngineError::CameraOpen { index: 0, .. })
        ));
    }
}
