pub mod decoder;
pub mod image_pipeline;
pub mod model_config;
pub mod models;
pub mod sanitize;
pub mod task;
