//! rollcall-store — Persisted state for the attendance system.
//!
//! Two stores, both whole-file overwrite on every write: the identity
//! gallery (JSON, plus one audit image per enrolled face) and the
//! attendance ledger (CSV, one row per calendar day, one column per
//! identity).

pub mod gallery;
pub mod ledger;

pub use gallery::{Gallery, GalleryError};
pub use ledger::{AttendanceLedger, LedgerError, MarkOutcome};
