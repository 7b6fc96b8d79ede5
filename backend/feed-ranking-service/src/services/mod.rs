//! Service layer for feed-ranking-service
//!
//! - scoring: per-viewer composite score
//! - visibility: followed-author sampling gate (fail-open)
//! - distribution: staged rollout and engagement rate
//! - diversity: author cap, type interleave, spacing
//! - engagement: counter increments and rollout re-evaluation
//! - dampening: optional thinning of stale low-engagement items
//! - assembler: request pipeline tying the above together

pub mod assembler;
pub mod dampening;
pub mod distribution;
pub mod diversity;
pub mod engagement;
pub mod scoring;
pub mod visibility;

pub use assembler::{FeedAssembler, FeedError, FeedRequest};
pub use distribution::{DistributionController, DistributionStage};
pub use diversity::DiversityEnforcer;
pub use engagement::EngagementAccumulator;
pub use scoring::FeedScore;
