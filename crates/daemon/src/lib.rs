pub mod analysis;
pub mod api;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod media;
pub mod pipeline;

pub use config::Config;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Collaborators, Pipeline};
