//! rollcall-core — Face detection, embedding extraction, matching, liveness.
//!
//! Detection uses SCRFD and embedding extraction uses ArcFace, both running
//! via ONNX Runtime on CPU. The models supply the recognition signal; this
//! crate wraps them and adds the matching and liveness decision logic on top.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod liveness;
pub mod types;

pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;
pub use types::{Embedding, FaceBox, IdentityRecord, MatchResult, Matcher, NearestMatcher};
