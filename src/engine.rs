use crate::types::ToxicityScores;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Engine {
    async fn classify(&self, text: String) -> Result<ToxicityScores>;
}
