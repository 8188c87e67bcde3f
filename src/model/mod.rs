pub mod cache;
pub mod resolver;

pub use cache::{ModelCache, ModelInfo};
pub use resolver::{ModelResolver, ModelSource, Resolution};
