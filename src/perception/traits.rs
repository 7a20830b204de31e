use async_trait::async_trait;

use crate::errors::HeatloopResult;
use crate::perception::types::CapturedFrame;

/// Source of full-resolution frames. The real implementation captures the
/// primary monitor; tests script frames directly.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> HeatloopResult<CapturedFrame>;
}
