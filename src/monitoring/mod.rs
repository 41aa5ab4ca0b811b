//! Run Monitoring
//!
//! - [`ExecutionTimeline`]: task start/end timing for the end-of-run chart

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
