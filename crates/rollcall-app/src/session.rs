//! The recognition session: the per-frame attendance loop on its own thread.
//!
//! The session owns the camera, the two vision models, the display window,
//! and (for its lifetime) the gallery and ledger. It reports everything of
//! interest to the menu task over an event channel; enrollment is a suspend
//! point where the session asks for a name and blocks on a oneshot reply,
//! so stdin is never touched from this thread.

use crate::config::Config;
use crate::display::{Display, DisplayError, FaceTag, Overlay};
use chrono::Local;
use rollcall_core::liveness::{self, Challenge, ChallengeIo, ChallengeOutcome, FaceObservation};
use rollcall_core::{FaceDetector, FaceEmbedder, Matcher, NearestMatcher};
use rollcall_hw::{Camera, Frame};
use rollcall_store::{AttendanceLedger, Gallery, MarkOutcome};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Extra margin kept around the detected box when saving the audit crop.
const FACE_CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] rollcall_core::embedder::EmbedderError),
    #[error("display error: {0}")]
    Display(#[from] DisplayError),
}

/// Everything the session needs from the application config.
pub struct SessionSettings {
    pub camera_device: String,
    pub detector_model: String,
    pub embedder_model: String,
    pub match_tolerance: f32,
    pub min_brightness: f32,
    pub challenge_step: Duration,
    pub warmup_frames: usize,
}

impl SessionSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            camera_device: cfg.camera_device.clone(),
            detector_model: cfg.detector_model_path(),
            embedder_model: cfg.embedder_model_path(),
            match_tolerance: cfg.match_tolerance,
            min_brightness: cfg.min_brightness,
            challenge_step: Duration::from_secs(cfg.challenge_step_secs),
            warmup_frames: cfg.warmup_frames,
        }
    }
}

/// Messages from the session thread to the menu task.
pub enum SessionEvent {
    AttendanceMarked { name: String },
    SpoofSuspected { name: String },
    LowLight,
    ChallengeStep { prompt: &'static str },
    ChallengeFailed { prompt: &'static str },
    /// Liveness passed for an unknown face; the menu must reply with the
    /// new identity's name, or `None` to skip enrollment.
    EnrollRequested { reply: oneshot::Sender<Option<String>> },
    Enrolled { name: String },
    EnrollAborted,
    EnrollFailed { reason: String },
    Ended { reason: String },
}

/// Handle to a running session: the event stream plus the stores that come
/// back when the thread finishes.
pub struct SessionHandle {
    pub events: mpsc::Receiver<SessionEvent>,
    join: std::thread::JoinHandle<(Gallery, AttendanceLedger)>,
}

impl SessionHandle {
    /// Reclaim the gallery and ledger after the event stream has ended.
    pub fn finish(self) -> anyhow::Result<(Gallery, AttendanceLedger)> {
        self.join
            .join()
            .map_err(|_| anyhow::anyhow!("session thread panicked"))
    }
}

/// Spawn the recognition loop on a dedicated OS thread.
///
/// The gallery and ledger move into the thread for its lifetime and are
/// handed back through [`SessionHandle::finish`]. Startup failures (camera,
/// models, window) surface as the `Ended` reason.
pub fn spawn(
    settings: SessionSettings,
    gallery: Gallery,
    ledger: AttendanceLedger,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel::<SessionEvent>(32);

    let join = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            let mut gallery = gallery;
            let mut ledger = ledger;
            let reason = match Session::open(settings, tx.clone()) {
                Ok(mut session) => session.run(&mut gallery, &mut ledger),
                Err(e) => {
                    tracing::error!(error = %e, "session failed to start");
                    format!("failed to start: {e}")
                }
            };
            let _ = tx.blocking_send(SessionEvent::Ended { reason });
            (gallery, ledger)
        })
        .expect("failed to spawn session thread");

    SessionHandle { events: rx, join }
}

/// The session context: every resource the loop touches, owned explicitly.
struct Session {
    camera: Camera,
    detector: FaceDetector,
    embedder: FaceEmbedder,
    display: Display,
    matcher: NearestMatcher,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
    low_light_active: bool,
}

impl Session {
    /// Open the camera, load both models, and create the window. Fail-fast:
    /// a session without any of these is not worth starting.
    fn open(
        settings: SessionSettings,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let camera = Camera::open(&settings.camera_device)?;
        let detector = FaceDetector::load(&settings.detector_model)?;
        let embedder = FaceEmbedder::load(&settings.embedder_model)?;
        let display = Display::open(camera.width, camera.height)?;

        tracing::info!(
            device = %settings.camera_device,
            width = camera.width,
            height = camera.height,
            "session resources ready"
        );

        Ok(Self {
            camera,
            detector,
            embedder,
            display,
            matcher: NearestMatcher,
            settings,
            events,
            low_light_active: false,
        })
    }

    /// The per-frame loop. Returns the reason the session ended.
    fn run(&mut self, gallery: &mut Gallery, ledger: &mut AttendanceLedger) -> String {
        if self.settings.warmup_frames > 0 {
            tracing::debug!(count = self.settings.warmup_frames, "discarding warmup frames");
            for _ in 0..self.settings.warmup_frames {
                let _ = self.camera.capture_frame();
            }
        }

        loop {
            if self.display.quit_requested() {
                return "operator quit".into();
            }

            let frame = match self.camera.capture_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    // Transient by design: a live device recovers on its own.
                    tracing::debug!(error = %e, "frame capture failed; retrying");
                    continue;
                }
            };

            if !frame.is_well_lit(self.settings.min_brightness) {
                self.enter_low_light(&frame);
                self.present(&frame, Overlay { face: None, low_light: true });
                continue;
            }
            self.leave_low_light();

            let faces = match self.detector.detect(&frame.data, frame.width, frame.height) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(error = %e, "detection failed on frame");
                    self.present(&frame, Overlay::default());
                    continue;
                }
            };
            // One face per frame: the most confident detection only.
            let Some(face) = faces.into_iter().next() else {
                self.present(&frame, Overlay::default());
                continue;
            };

            let embedding = match self
                .embedder
                .extract(&frame.data, frame.width, frame.height, &face)
            {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding extraction failed on frame");
                    self.present(&frame, Overlay::default());
                    continue;
                }
            };

            let result =
                self.matcher
                    .compare(&embedding, gallery.records(), self.settings.match_tolerance);

            let tag = match result.name {
                Some(name) => {
                    if liveness::eyes_open(&frame.data, frame.width, frame.height, &face) {
                        match ledger.mark(&name, Local::now()) {
                            Ok(MarkOutcome::Marked) => {
                                self.emit(SessionEvent::AttendanceMarked { name: name.clone() });
                            }
                            Ok(MarkOutcome::Suppressed) => {}
                            Err(e) => {
                                tracing::error!(name = %name, error = %e, "failed to persist attendance mark");
                            }
                        }
                        FaceTag::Known(name)
                    } else {
                        tracing::warn!(name = %name, distance = result.distance, "matched face failed the eye check");
                        self.emit(SessionEvent::SpoofSuspected { name });
                        FaceTag::Spoof
                    }
                }
                None => self.enroll_flow(gallery, ledger, &frame, &face, embedding),
            };

            self.present(&frame, Overlay { face: Some((face, tag)), low_light: false });
        }
    }

    /// Enrollment path for an unmatched face: active liveness challenge,
    /// then a name request to the menu task, then the gallery write and an
    /// immediate attendance mark.
    fn enroll_flow(
        &mut self,
        gallery: &mut Gallery,
        ledger: &mut AttendanceLedger,
        frame: &Frame,
        face: &rollcall_core::FaceBox,
        embedding: rollcall_core::Embedding,
    ) -> FaceTag {
        let seed: u64 = rand::random();
        let outcome = {
            let budget = self.settings.challenge_step;
            let mut driver = ChallengeDriver { session: self };
            liveness::run_challenge(seed, budget, &mut driver)
        };

        if let ChallengeOutcome::Failed(step) = outcome {
            tracing::info!(step = step.prompt(), "liveness challenge failed; enrollment aborted");
            self.emit(SessionEvent::ChallengeFailed { prompt: step.prompt() });
            self.display.set_status("");
            return FaceTag::Unknown;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.emit(SessionEvent::EnrollRequested { reply: reply_tx });
        self.display.set_status("enrollment: enter a name in the console");

        let name = match reply_rx.blocking_recv() {
            Ok(Some(name)) => name,
            _ => {
                self.emit(SessionEvent::EnrollAborted);
                self.display.set_status("");
                return FaceTag::Unknown;
            }
        };
        self.display.set_status("");

        let (crop, crop_w, crop_h) = crop_face(frame, face);
        match gallery.enroll(&name, embedding, &crop, crop_w, crop_h) {
            Ok(()) => {
                self.emit(SessionEvent::Enrolled { name: name.clone() });
                match ledger.mark(&name, Local::now()) {
                    Ok(MarkOutcome::Marked) => {
                        self.emit(SessionEvent::AttendanceMarked { name: name.clone() });
                    }
                    Ok(MarkOutcome::Suppressed) => {}
                    Err(e) => {
                        tracing::error!(name = %name, error = %e, "failed to persist attendance mark");
                    }
                }
                FaceTag::Known(name)
            }
            Err(e) => {
                tracing::error!(name = %name, error = %e, "enrollment failed");
                self.emit(SessionEvent::EnrollFailed {
                    reason: e.to_string(),
                });
                FaceTag::Unknown
            }
        }
    }

    fn enter_low_light(&mut self, frame: &Frame) {
        if !self.low_light_active {
            self.low_light_active = true;
            tracing::warn!(
                brightness = frame.mean_brightness(),
                threshold = self.settings.min_brightness,
                "lighting below threshold; skipping detection"
            );
            self.emit(SessionEvent::LowLight);
            self.display.set_status("low light — improve lighting");
        }
    }

    fn leave_low_light(&mut self) {
        if self.low_light_active {
            self.low_light_active = false;
            self.display.set_status("");
        }
    }

    fn present(&mut self, frame: &Frame, overlay: Overlay) {
        if let Err(e) = self.display.present(frame, &overlay) {
            tracing::warn!(error = %e, "display update failed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.blocking_send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

/// Drives the liveness challenge from the session's camera and detector,
/// keeping the display live while the operator performs the steps.
struct ChallengeDriver<'a> {
    session: &'a mut Session,
}

impl ChallengeIo for ChallengeDriver<'_> {
    fn prompt(&mut self, step: Challenge) {
        self.session
            .emit(SessionEvent::ChallengeStep { prompt: step.prompt() });
        self.session
            .display
            .set_status(&format!("liveness: {}", step.prompt()));
    }

    fn observe(&mut self) -> Option<FaceObservation> {
        let frame = self.session.camera.capture_frame().ok()?;
        let faces = self
            .session
            .detector
            .detect(&frame.data, frame.width, frame.height)
            .ok()?;
        let face = faces.into_iter().next()?;
        let eyes_open = liveness::eyes_open(&frame.data, frame.width, frame.height, &face);
        self.session.present(
            &frame,
            Overlay {
                face: Some((face, FaceTag::Unknown)),
                low_light: false,
            },
        );
        Some(FaceObservation { eyes_open })
    }
}

/// Cut the detected face out of the frame with a margin, for the audit image.
fn crop_face(frame: &Frame, face: &rollcall_core::FaceBox) -> (Vec<u8>, u32, u32) {
    let margin_x = face.width * FACE_CROP_MARGIN;
    let margin_y = face.height * FACE_CROP_MARGIN;
    frame.crop(
        (face.x - margin_x) as i32,
        (face.y - margin_y) as i32,
        (face.width + 2.0 * margin_x) as u32,
        (face.height + 2.0 * margin_y) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_face_adds_margin() {
        let frame = Frame {
            data: vec![128u8; 100 * 100],
            width: 100,
            height: 100,
            timestamp: std::time::Instant::now(),
        };
        let face = rollcall_core::FaceBox {
            x: 40.0,
            y: 40.0,
            width: 20.0,
            height: 20.0,
            confidence: 0.9,
            landmarks: None,
        };
        let (crop, w, h) = crop_face(&frame, &face);
        assert_eq!((w, h), (26, 26));
        assert_eq!(crop.len(), 26 * 26);
    }

    #[test]
    fn test_crop_face_clamps_at_frame_edge() {
        let frame = Frame {
            data: vec![128u8; 100 * 100],
            width: 100,
            height: 100,
            timestamp: std::time::Instant::now(),
        };
        let face = rollcall_core::FaceBox {
            x: 0.0,
            y: 0.0,
            width: 30.0,
            height: 30.0,
            confidence: 0.9,
            landmarks: None,
        };
        let (crop, w, h) = crop_face(&frame, &face);
        assert!(!crop.is_empty());
        // Margin above and left is clipped off at the frame boundary.
        assert!(w <= 39 && h <= 39);
    }
}
