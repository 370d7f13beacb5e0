//! One capture session on a dedicated thread
//!
//! The camera and landmark detector are opened on the capture thread and
//! dropped there on every exit path. `stop()` blocks until that has happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, ErrorEvent, EventSink};
use crate::keyboard::KeyboardLayout;

use super::frame_loop::{run_capture_loop, FrameProcessor};
use super::{CaptureRequest, VisionBackend};

/// Handle to a running capture thread
pub struct CaptureSession {
    camera_index: u32,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Start capturing from `camera_index`.
    ///
    /// Returns once the camera and detector are open, or with the error
    /// that prevented opening them.
    pub fn start(
        camera_index: u32,
        config: EngineConfig,
        backend: Arc<dyn VisionBackend>,
        sink: Arc<dyn EventSink>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<EngineResult<()>>();

        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                info!(camera_index, "capture thread started");
                run_session(
                    camera_index,
                    &config,
                    backend.as_ref(),
                    &sink,
                    &thread_running,
                    ready_tx,
                );
                thread_running.store(false, Ordering::SeqCst);
                info!(camera_index, "capture thread stopped");
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(EngineError::Processing(
                "capture thread exited before opening the camera".to_string(),
            ))
        });
        if let Err(e) = ready {
            if handle.join().is_err() {
                error!("capture thread panicked during start");
            }
            return Err(e);
        }

        Ok(Self {
            camera_index,
            running,
            handle: Some(handle),
        })
    }

    pub fn camera_index(&self) -> u32 {
        self.camera_index
    }

    /// Whether the capture thread is still looping
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Request the loop to stop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(camera_index = self.camera_index, "capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread
fn run_session(
    camera_index: u32,
    config: &EngineConfig,
    backend: &dyn VisionBackend,
    sink: &Arc<dyn EventSink>,
    running: &AtomicBool,
    ready_tx: mpsc::Sender<EngineResult<()>>,
) {
    let request = CaptureRequest {
        width: config.frame_width,
        height: config.frame_height,
        fps: config.fps,
    };

    let opened = backend
        .open_camera(camera_index, &request)
        .and_then(|camera| Ok((camera, backend.open_detector(&config.detector)?)));
    let (mut camera, mut detector) = match opened {
        Ok(handles) => handles,
        Err(e) => {
            error!(camera_index, error = %e, "failed to open capture devices");
            sink.emit(EngineEvent::Error(ErrorEvent::from_error(&e, true)));
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(Ok(()));
    sink.emit(EngineEvent::SessionStarted { camera_index });
    info!(
        camera_index,
        dwell_secs = config.dwell_threshold_secs,
        word_timeout_secs = config.word_timeout_secs,
        "capture session running"
    );

    let mut processor = FrameProcessor::new(KeyboardLayout::default(), config);
    let exit = run_capture_loop(
        camera.as_mut(),
        detector.as_mut(),
        &mut processor,
        sink,
        running,
        config.max_consecutive_errors,
    );

    // Release devices before announcing the stop
    drop(detector);
    drop(camera);

    if let Some(e) = &exit.error {
        sink.emit(EngineEvent::Error(ErrorEvent::from_error(e, true)));
    }
    let text = processor.text().buffer();
    if !text.current_word.is_empty() {
        warn!(
            word = %text.current_word,
            sentence = %text.sentence,
            "session ended with an uncommitted word"
        );
    }
    info!(camera_index, frames = exit.frames, "capture session ended");
    sink.emit(EngineEvent::SessionStopped {
        camera_index,
        frames: exit.frames,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::RgbImage;

    use crate::capture::{
        DetectorSettings, FingertipSample, FrameSource, LandmarkProvider, ScriptedBackend,
    };
    use crate::error::ErrorKind;
    use crate::events::TextEvent;

    /// Normalized centre of `symbol` in the scripted 1280x720 frame
    fn key_center(symbol: &str) -> (f32, f32) {
        let rects = KeyboardLayout::default().rectangles_for(1280, 720);
        let r = rects.iter().find(|kr| kr.key.symbol() == symbol).unwrap().rect;
        (
            (r.x + r.width / 2) as f32 / 1280.0,
            (r.y + r.height / 2) as f32 / 720.0,
        )
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            dwell_threshold_secs: 0.02,
            word_timeout_secs: 10.0,
            ..EngineConfig::default()
        }
    }

    fn collect(rx: &mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        rx.try_iter().collect()
    }

    fn text_events(events: &[EngineEvent]) -> Vec<TextEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    fn wait_for_stop(rx: &mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
            let stopped = matches!(event, EngineEvent::SessionStopped { .. });
            events.push(event);
            if stopped {
                break;
            }
        }
        events
    }

    #[test]
    fn test_session_types_key_and_ends_with_device_error() {
        let q = key_center("q");
        let mut samples = vec![Some(q); 20];
        samples.extend(vec![None; 5]);
        let backend = ScriptedBackend::new(samples).with_frame_interval(Duration::from_millis(5));

        let (tx, rx) = mpsc::channel();
        let mut session =
            CaptureSession::start(0, fast_config(), Arc::new(backend), Arc::new(tx)).unwrap();
        let events = wait_for_stop(&rx);
        session.stop();
        assert!(!session.is_running());

        assert!(matches!(events[0], EngineEvent::SessionStarted { camera_index: 0 }));
        assert_eq!(text_events(&events), vec![TextEvent::Character { ch: 'q' }]);

        let frames = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Frame(_)))
            .count();
        assert_eq!(frames, 25);

        let fatal: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].kind, ErrorKind::FrameRead);
        assert!(fatal[0].fatal);
        assert!(matches!(
            events.last(),
            Some(EngineEvent::SessionStopped { frames: 25, .. })
        ));
    }

    #[test]
    fn test_session_commits_word_after_inactivity() {
        let o = key_center("o");
        let mut samples = vec![Some(o); 20];
        samples.extend(vec![None; 40]);
        let backend = ScriptedBackend::new(samples).with_frame_interval(Duration::from_millis(5));
        let config = EngineConfig {
            word_timeout_secs: 0.05,
            ..fast_config()
        };

        let (tx, rx) = mpsc::channel();
        let _session = CaptureSession::start(0, config, Arc::new(backend), Arc::new(tx)).unwrap();
        let events = wait_for_stop(&rx);

        assert_eq!(
            text_events(&events),
            vec![
                TextEvent::Character { ch: 'o' },
                TextEvent::WordCommitted { word: "o".into() }
            ]
        );
    }

    #[test]
    fn test_stop_joins_thread() {
        let backend = ScriptedBackend::new(vec![None; 100_000])
            .with_frame_interval(Duration::from_millis(2));

        let (tx, rx) = mpsc::channel();
        let mut session =
            CaptureSession::start(0, fast_config(), Arc::new(backend), Arc::new(tx)).unwrap();
        assert!(session.is_running());
        assert_eq!(session.camera_index(), 0);

        std::thread::sleep(Duration::from_millis(30));
        session.stop();
        assert!(!session.is_running());

        // Stopping is not an error and the stop notice is already queued
        let events = collect(&rx);
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::Error(_))));
        assert!(matches!(events.last(), Some(EngineEvent::SessionStopped { .. })));

        // Idempotent
        session.stop();
    }

    #[test]
    fn test_camera_open_failure_is_returned() {
        let backend = ScriptedBackend::new(vec![None]).with_cameras(vec![0]);
        let (tx, rx) = mpsc::channel();

        let result = CaptureSession::start(3, fast_config(), Arc::new(backend), Arc::new(tx));
        assert!(matches!(result, Err(EngineError::CameraOpen { index: 3, .. })));

        let events = collect(&rx);
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::Error(ErrorEvent {
                kind: ErrorKind::CameraOpen,
                fatal: true,
                ..
            })]
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_start() {
        let config = EngineConfig {
            dwell_threshold_secs: -1.0,
            ..EngineConfig::default()
        };
        let (tx, rx) = mpsc::channel();
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let result = CaptureSession::start(0, config, backend, Arc::new(tx));
        assert!(matches!(result, Err(EngineError::Configuration(_))));
        assert!(collect(&rx).is_empty());
    }

    struct BlankCamera;

    impl FrameSource for BlankCamera {
        fn read_frame(&mut self) -> EngineResult<RgbImage> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(RgbImage::new(64, 48))
        }
    }

    struct BrokenDetector;

    impl LandmarkProvider for BrokenDetector {
        fn detect(
            &mut self,
            _frame: &RgbImage,
            _captured_at: std::time::Instant,
        ) -> EngineResult<Option<FingertipSample>> {
            Err(EngineError::Processing("model returned garbage".to_string()))
        }
    }

    struct BrokenModelBackend;

    impl VisionBackend for BrokenModelBackend {
        fn probe(&self, _index: u32) -> bool {
            true
        }

        fn open_camera(
            &self,
            _index: u32,
            _request: &CaptureRequest,
        ) -> EngineResult<Box<dyn FrameSource>> {
            Ok(Box::new(BlankCamera))
        }

        fn open_detector(
            &self,
            _settings: &DetectorSettings,
        ) -> EngineResult<Box<dyn LandmarkProvider>> {
            Ok(Box::new(BrokenDetector))
        }
    }

    #[test]
    fn test_repeated_processing_errors_escalate() {
        let config = EngineConfig {
            max_consecutive_errors: 3,
            ..fast_config()
        };
        let (tx, rx) = mpsc::channel();
        let _session =
            CaptureSession::start(0, config, Arc::new(BrokenModelBackend), Arc::new(tx)).unwrap();
        let events = wait_for_stop(&rx);

        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Processing));
        assert!(!errors[0].fatal && !errors[1].fatal);
        assert!(errors[2].fatal);
        assert!(!events.iter().any(|e| matches!(e, EngineEvent::Frame(_))));
    }
}
