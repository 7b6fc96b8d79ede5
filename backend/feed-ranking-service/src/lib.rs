pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};

pub use services::{
    DistributionController, DistributionStage, DiversityEnforcer, EngagementAccumulator,
    FeedAssembler, FeedRequest, FeedScore,
};
