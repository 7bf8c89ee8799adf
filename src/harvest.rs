//! Chunked event harvesting: request-window sizing, retry backoff, the
//! per-chunk fetch loop, the bounded worker pool and the driver tying them
//! to the checkpoint store.

mod backoff;
mod fetcher;
pub mod harvester;
pub mod sizer;
mod worker_pool;

pub use harvester::{EventHarvester, HarvestQuery};
pub use sizer::{SpanSizer, MIN_REQUEST_SPAN};
