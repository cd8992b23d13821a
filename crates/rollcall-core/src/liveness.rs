//! Liveness checks guarding attendance marks and enrollment.
//!
//! Two independent gates:
//!
//! - A passive per-frame check, [`eyes_open`], used on every matched face.
//!   A printed photo held to the camera tends to lose the dark-pupil /
//!   bright-sclera texture around the eye landmarks, so the check requires
//!   the eye points to sit inside the face box with enough local contrast.
//! - An active challenge sequence, [`run_challenge`], used once before a
//!   brand-new identity is enrolled. Three steps in a seeded random order,
//!   each with a fixed time budget; the first step to time out fails the
//!   whole sequence.

use crate::types::FaceBox;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::{Duration, Instant};

/// Half-width of the square pixel window sampled around each eye landmark.
const EYE_WINDOW_RADIUS: usize = 5;

/// Minimum pixel standard deviation inside an eye window for the region to
/// count as an open eye. Flat prints and closed lids land well below this.
const EYE_MIN_STDDEV: f32 = 10.0;

/// Passive eye-presence check on a matched face.
///
/// Returns true iff at least one eye landmark lies inside the face box and
/// its local neighbourhood shows eye-like contrast. A detection without
/// landmarks never passes.
pub fn eyes_open(frame: &[u8], width: u32, height: u32, face: &FaceBox) -> bool {
    let Some(landmarks) = face.landmarks.as_ref() else {
        return false;
    };

    // Landmarks 0 and 1 are the left and right eye centres.
    landmarks[..2].iter().any(|&(ex, ey)| {
        face.contains(ex, ey) && eye_window_stddev(frame, width, height, ex, ey) >= EYE_MIN_STDDEV
    })
}

/// Pixel standard deviation in the window centred on (cx, cy), clipped to
/// the frame. An empty window reads as zero contrast.
fn eye_window_stddev(frame: &[u8], width: u32, height: u32, cx: f32, cy: f32) -> f32 {
    let (w, h) = (width as i64, height as i64);
    let cx = cx.round() as i64;
    let cy = cy.round() as i64;
    let r = EYE_WINDOW_RADIUS as i64;

    let x_lo = (cx - r).max(0);
    let x_hi = (cx + r).min(w - 1);
    let y_lo = (cy - r).max(0);
    let y_hi = (cy + r).min(h - 1);
    if x_lo > x_hi || y_lo > y_hi {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut count = 0.0f32;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let p = frame[(y * w + x) as usize] as f32;
            sum += p;
            sum_sq += p * p;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0).sqrt()
}

/// One step of the active enrollment challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Blink,
    TurnLeft,
    TurnRight,
}

impl Challenge {
    /// Operator-facing instruction for this step.
    pub fn prompt(&self) -> &'static str {
        match self {
            Challenge::Blink => "blink your eyes",
            Challenge::TurnLeft => "turn your face to the left",
            Challenge::TurnRight => "turn your face to the right",
        }
    }
}

/// Shuffle the three challenge steps deterministically from a seed.
///
/// Pure over the seed so tests can pin the order; production passes fresh
/// entropy per enrollment attempt.
pub fn shuffle_challenges(seed: u64) -> [Challenge; 3] {
    let mut steps = [Challenge::Blink, Challenge::TurnLeft, Challenge::TurnRight];
    steps.shuffle(&mut StdRng::seed_from_u64(seed));
    steps
}

/// What one frame probe observed about the subject.
#[derive(Debug, Clone, Copy)]
pub struct FaceObservation {
    pub eyes_open: bool,
}

/// Frame supply and prompt surface for a running challenge.
///
/// The session implements this over its camera, detector, and display; tests
/// implement it with scripted observations.
pub trait ChallengeIo {
    /// Announce the step that is starting.
    fn prompt(&mut self, step: Challenge);
    /// Observe the next frame: `None` when no face was seen (including
    /// capture failures), `Some` with the passive eye state otherwise.
    fn observe(&mut self) -> Option<FaceObservation>;
}

/// Terminal result of a challenge sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    AllPassed,
    /// The named step's time budget elapsed; later steps were skipped.
    Failed(Challenge),
}

/// Run the full enrollment challenge sequence.
///
/// The blink step passes on the first observation with open eyes; the turn
/// steps pass on any observation at all — directional pose estimation is a
/// deliberate stub, so presence is accepted. A step whose budget elapses
/// without a qualifying observation fails the whole sequence immediately.
pub fn run_challenge(
    seed: u64,
    step_budget: Duration,
    io: &mut impl ChallengeIo,
) -> ChallengeOutcome {
    for step in shuffle_challenges(seed) {
        io.prompt(step);

        let deadline = Instant::now() + step_budget;
        let mut passed = false;
        while Instant::now() < deadline {
            let Some(observation) = io.observe() else {
                continue;
            };
            match step {
                Challenge::Blink => {
                    if observation.eyes_open {
                        passed = true;
                        break;
                    }
                }
                Challenge::TurnLeft | Challenge::TurnRight => {
                    passed = true;
                    break;
                }
            }
        }

        if !passed {
            return ChallengeOutcome::Failed(step);
        }
    }

    ChallengeOutcome::AllPassed
}
