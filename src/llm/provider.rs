use async_trait::async_trait;

use crate::errors::HeatloopResult;

/// The decision step of a turn: the carried story plus the annotated render
/// go in, the model's raw text (prose report + action lines) comes out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, story: &str, annotated_png: &[u8]) -> HeatloopResult<String>;
}
