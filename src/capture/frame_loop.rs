//! Per-frame pipeline and the capture loop
//!
//! read frame -> mirror -> detect fingertip -> hit test -> dwell -> text
//! -> overlay -> publish -> inactivity check

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::dwell::DwellDetector;
use crate::error::EngineError;
use crate::events::{EngineEvent, ErrorEvent, EventSink, RenderedFrame, TextEvent};
use crate::keyboard::{hit_test, KeyRect, KeyboardLayout, Point};
use crate::render;
use crate::text::TextAssembler;

use super::{FingertipSample, FrameSource, LandmarkProvider};

/// Result of processing one frame
#[derive(Debug, Default)]
pub(crate) struct FrameOutcome {
    pub fingertip: Option<Point>,
    pub text: Vec<TextEvent>,
}

/// Session state driven by the loop: geometry cache, dwell and text
pub(crate) struct FrameProcessor {
    layout: KeyboardLayout,
    /// Key rectangles for the last seen frame size
    geometry: Option<((u32, u32), Vec<KeyRect>)>,
    dwell: DwellDetector,
    text: TextAssembler,
}

impl FrameProcessor {
    pub fn new(layout: KeyboardLayout, config: &EngineConfig) -> Self {
        Self {
            layout,
            geometry: None,
            dwell: DwellDetector::new(config.dwell_threshold()),
            text: TextAssembler::new(config.word_timeout()),
        }
    }

    /// Run hit test, dwell and text assembly for one sample, then paint the
    /// overlay onto `frame`
    pub fn process(
        &mut self,
        frame: &mut RgbImage,
        sample: Option<&FingertipSample>,
        now: Instant,
    ) -> FrameOutcome {
        let size = frame.dimensions();
        if self.geometry.as_ref().map(|(s, _)| *s) != Some(size) {
            debug!(width = size.0, height = size.1, "keyboard geometry rebuilt");
            self.geometry = Some((size, self.layout.rectangles_for(size.0, size.1)));
        }
        let rects = match &self.geometry {
            Some((_, rects)) => rects.as_slice(),
            None => &[],
        };

        let fingertip = sample.map(|s| Point::from_normalized(s.x, s.y, size.0, size.1));
        let hit = fingertip.and_then(|p| hit_test(p, rects));
        let at = sample.map(|s| s.captured_at).unwrap_or(now);

        let mut outcome = FrameOutcome {
            fingertip,
            text: Vec::new(),
        };
        if let Some(key) = self.dwell.observe(hit, at) {
            debug!(key = %key, row = key.row(), column = key.column(), "key confirmed");
            outcome.text = self.text.apply(&key, at);
        }

        render::draw_keyboard(frame, rects, self.dwell.highlight(now));
        render::draw_text_panel(frame, self.text.current_word(), self.text.sentence());
        if let Some(point) = fingertip {
            render::draw_fingertip(frame, point);
        }

        outcome
    }

    /// Forget the held key; a hold must span consecutive good frames
    pub fn reset_dwell(&mut self) {
        if let Some(key) = self.dwell.state().key() {
            debug!(key = %key, "dwell reset after abandoned frame");
        }
        self.dwell.reset();
    }

    pub fn check_inactivity(&mut self, now: Instant) -> Vec<TextEvent> {
        self.text.check_inactivity(now)
    }

    pub fn text(&self) -> &TextAssembler {
        &self.text
    }
}

/// How the loop ended
#[derive(Debug)]
pub(crate) struct LoopExit {
    pub frames: u64,
    /// Fatal error, or `None` when stopped on request
    pub error: Option<EngineError>,
}

/// Drive frames until `running` is cleared or a fatal error occurs
pub(crate) fn run_capture_loop(
    camera: &mut dyn FrameSource,
    detector: &mut dyn LandmarkProvider,
    processor: &mut FrameProcessor,
    sink: &Arc<dyn EventSink>,
    running: &AtomicBool,
    max_consecutive_errors: u32,
) -> LoopExit {
    let mut frames = 0u64;
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::SeqCst) {
        let mut frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, frames, "frame read failed, ending session");
                return LoopExit {
                    frames,
                    error: Some(e),
                };
            }
        };
        let now = Instant::now();
        frames += 1;

        image::imageops::flip_horizontal_in_place(&mut frame);

        let result = detector.detect(&frame, now).and_then(|sample| {
            catch_unwind(AssertUnwindSafe(|| {
                processor.process(&mut frame, sample.as_ref(), now)
            }))
            .map_err(|_| EngineError::Processing("frame pipeline panicked".to_string()))
        });

        match result {
            Ok(outcome) => {
                consecutive_errors = 0;
                for event in outcome.text {
                    sink.emit(EngineEvent::Text(event));
                }
                sink.emit(EngineEvent::Frame(RenderedFrame {
                    index: frames,
                    image: Arc::new(frame),
                    fingertip: outcome.fingertip,
                    captured_at: now,
                }));
            }
            Err(e) => {
                consecutive_errors += 1;
                if e.is_fatal() || consecutive_errors >= max_consecutive_errors {
                    error!(
                        error = %e,
                        consecutive_errors,
                        "frame processing failed, ending session"
                    );
                    return LoopExit {
                        frames,
                        error: Some(e),
                    };
                }
                warn!(error = %e, consecutive_errors, "frame abandoned");
                processor.reset_dwell();
                sink.emit(EngineEvent::Error(ErrorEvent::from_error(&e, false)));
            }
        }

        for event in processor.check_inactivity(Instant::now()) {
            sink.emit(EngineEvent::Text(event));
        }
    }

    LoopExit {
        frames,
        error: None,
    }
}
