//! Generated city content: hotspots and quick wins.
//!
//! `generator` calls the completion service and `sanitize` turns its
//! untrusted JSON into drafts. `writer` persists them as `model` records.

pub mod generator;
pub mod model;
pub mod sanitize;
pub mod writer;

pub use generator::ContentGenerator;
pub use model::{
    Hotspot, HotspotDraft, HotspotStatus, Level, Metric, QuickWin, QuickWinDraft, Severity, Trend,
};
pub use sanitize::PROVENANCE_TAG;
pub use writer::RecordWriter;
