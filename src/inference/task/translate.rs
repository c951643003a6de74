use anyhow::Result;
use axum::async_trait;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source_language: &str, target_language: &str)
        -> Result<String>;
}
