use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Action;
use crate::executor::coordinator::to_physical_pixels;
use crate::executor::input::{ClickKind, InputDriver, PhysicalAction};
use crate::perception::types::CropRegion;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Canonical forms of the actions that were delivered.
    pub executed: Vec<String>,
    pub errors: Vec<String>,
}

/// Normalized action -> physical gesture inside `crop`.
pub fn to_physical(action: &Action, crop: &CropRegion) -> PhysicalAction {
    let px = |p| to_physical_pixels(p, crop);
    match action {
        Action::Click { point } => {
            let (x, y) = px(*point);
            PhysicalAction::Click { x, y, kind: ClickKind::Left }
        }
        Action::RightClick { point } => {
            let (x, y) = px(*point);
            PhysicalAction::Click { x, y, kind: ClickKind::Right }
        }
        Action::DoubleClick { point } => {
            let (x, y) = px(*point);
            PhysicalAction::Click { x, y, kind: ClickKind::Double }
        }
        Action::Drag { start, end } => PhysicalAction::Drag { from: px(*start), to: px(*end) },
        Action::Scroll { point, delta } => {
            let (x, y) = px(*point);
            PhysicalAction::Scroll { x, y, delta: *delta }
        }
        Action::Write { text } => PhysicalAction::Type { text: text.clone() },
        Action::Press { key } => PhysicalAction::Key { key: key.clone() },
    }
}

/// Deliver `actions` in order. A failed action is reported and the rest
/// still run.
pub async fn dispatch(actions: &[Action], crop: &CropRegion, driver: &dyn InputDriver) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    for action in actions {
        let physical = to_physical(action, crop);
        match driver.perform(physical).await {
            Ok(()) => report.executed.push(action.canonical()),
            Err(e) => {
                tracing::warn!(action = %action.canonical(), error = %e, "action failed");
                report.errors.push(format!("{}: {e}", action.canonical()));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{HeatloopError, HeatloopResult};
    use crate::executor::input::RecordingDriver;
    use crate::perception::types::NormalizedPoint;
    use async_trait::async_trait;

    fn pt(x: i64, y: i64) -> NormalizedPoint {
        NormalizedPoint::new(x, y).unwrap()
    }

    #[tokio::test]
    async fn click_lands_on_crop_scaled_pixel() {
        let crop = CropRegion { x1: 100, y1: 50, w: 1024, h: 576 };
        let driver = RecordingDriver::new();
        let report = dispatch(
            &[
                Action::Click { point: pt(500, 500) },
                Action::Drag { start: pt(0, 0), end: pt(1000, 1000) },
            ],
            &crop,
            &driver,
        )
        .await;
        assert_eq!(report.executed, vec!["click(500, 500)", "drag(0, 0, 1000, 1000)"]);
        assert_eq!(
            driver.performed(),
            vec![
                PhysicalAction::Click { x: 612, y: 338, kind: ClickKind::Left },
                PhysicalAction::Drag { from: (100, 50), to: (1123, 625) },
            ]
        );
    }

    struct RejectKeys;

    #[async_trait]
    impl InputDriver for RejectKeys {
        async fn perform(&self, action: PhysicalAction) -> HeatloopResult<()> {
            match action {
                PhysicalAction::Key { .. } => Err(HeatloopError::Executor("no keyboard".into())),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn failures_are_reported_and_do_not_stop_the_rest() {
        let crop = CropRegion::full(100, 100);
        let report = dispatch(
            &[Action::Press { key: "enter".into() }, Action::Click { point: pt(1, 1) }],
            &crop,
            &RejectKeys,
        )
        .await;
        assert_eq!(report.executed, vec!["click(1, 1)"]);
        assert_eq!(report.errors.len(), 1);
    }
}
