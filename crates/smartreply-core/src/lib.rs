pub mod analyzer;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod entities;
pub mod error;
pub mod generator;
pub mod heuristics;
pub mod key_lock;
pub mod pipeline;
pub mod postprocess;
pub mod prompt;
pub mod relevance;
pub mod settings;
pub mod triggers;

pub use analyzer::*;
pub use cache::*;
pub use config::*;
pub use coordinator::*;
pub use entities::*;
pub use error::*;
pub use generator::*;
pub use heuristics::*;
pub use key_lock::*;
pub use pipeline::*;
pub use postprocess::*;
pub use prompt::*;
pub use relevance::*;
pub use settings::*;
pub use triggers::*;
