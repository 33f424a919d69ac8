pub mod assistants;
pub mod backtest;
pub mod cache;
pub mod config;
pub mod consensus;
pub mod context;
pub mod engine;
pub mod error;
pub mod guard;
pub mod jobs;
pub mod rescore;
pub mod sampler;
pub mod signals;
pub mod weights;

pub use engine::{RecommendReport, RecommendRequest, RecommendationEngine};
pub use error::{EngineError, Result};
