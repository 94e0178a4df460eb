//! Stratoflow pipeline runtime
//!
//! The in-service engine: a pull source fans out to a bounded worker pool,
//! messages are optionally enriched through a layered cache chain, then
//! batched into a polymorphic sink with exclusive ack/nack settlement and
//! graceful, deadline-bounded shutdown.

pub mod batcher;
pub mod cache;
pub mod enricher;
pub mod pipeline;
pub mod sinks;
pub mod stats;

pub use batcher::{BatchAccumulator, BatchSettings};
pub use cache::{CacheChain, NearCache};
pub use enricher::{uid_attribute_extractor, Applier, EnrichStage, Enricher, KeyExtractor};
pub use pipeline::{MessageTransformer, PipelineConfig, StreamingPipeline, Transformed};
pub use sinks::{ArchiveSink, BatchSink, PublishSink, SinkReport, WarehouseSink};
pub use stats::{PipelineCounters, PipelineStats};
