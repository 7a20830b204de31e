// Physical input delivery. Coordinates here are absolute screen pixels; the
// normalized -> physical mapping happens in `dispatcher` before anything
// reaches a driver.
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};

use crate::errors::{HeatloopError, HeatloopResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    Left,
    Right,
    Double,
}

/// One input gesture in physical pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PhysicalAction {
    Click { x: i32, y: i32, kind: ClickKind },
    Drag { from: (i32, i32), to: (i32, i32) },
    /// Positive `delta` scrolls down.
    Scroll { x: i32, y: i32, delta: i32 },
    Type { text: String },
    /// Key name or `+`-joined chord, e.g. `enter`, `ctrl+shift+t`.
    Key { key: String },
}

#[async_trait]
pub trait InputDriver: Send + Sync {
    async fn perform(&self, action: PhysicalAction) -> HeatloopResult<()>;
}

/// Dry-run driver: keeps every gesture it was asked to perform.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    performed: Mutex<Vec<PhysicalAction>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> Vec<PhysicalAction> {
        self.performed.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InputDriver for RecordingDriver {
    async fn perform(&self, action: PhysicalAction) -> HeatloopResult<()> {
        tracing::debug!(?action, "dry run: input not delivered");
        self.performed
            .lock()
            .map_err(|_| HeatloopError::Executor("recording driver poisoned".into()))?
            .push(action);
        Ok(())
    }
}

/// Real mouse and keyboard through `enigo`. Each gesture runs on a blocking
/// thread with its own connection, since the platform handle is not `Send`
/// everywhere.
#[derive(Debug, Default, Clone)]
pub struct EnigoDriver;

impl EnigoDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InputDriver for EnigoDriver {
    async fn perform(&self, action: PhysicalAction) -> HeatloopResult<()> {
        tracing::info!(?action, "delivering input");
        tokio::task::spawn_blocking(move || perform_blocking(action))
            .await
            .map_err(|e| HeatloopError::Executor(format!("join: {e}")))?
    }
}

const MOVE_STEPS: i32 = 20;
const STEP_PAUSE: Duration = Duration::from_millis(10);

fn input_err(e: impl std::fmt::Display) -> HeatloopError {
    HeatloopError::Executor(e.to_string())
}

fn pause(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

fn perform_blocking(action: PhysicalAction) -> HeatloopResult<()> {
    let mut enigo = Enigo::new(&Settings::default()).map_err(input_err)?;
    match action {
        PhysicalAction::Click { x, y, kind } => {
            smooth_move(&mut enigo, x, y)?;
            pause(120);
            let button = if kind == ClickKind::Right { Button::Right } else { Button::Left };
            press_release(&mut enigo, button)?;
            if kind == ClickKind::Double {
                pause(60);
                press_release(&mut enigo, button)?;
            }
        }
        PhysicalAction::Drag { from, to } => {
            smooth_move(&mut enigo, from.0, from.1)?;
            pause(80);
            enigo.button(Button::Left, Direction::Press).map_err(input_err)?;
            pause(60);
            let moved = smooth_move(&mut enigo, to.0, to.1);
            pause(60);
            // Release even if the move failed so the button is never left held.
            enigo.button(Button::Left, Direction::Release).map_err(input_err)?;
            moved?;
        }
        PhysicalAction::Scroll { x, y, delta } => {
            smooth_move(&mut enigo, x, y)?;
            pause(60);
            enigo.scroll(delta, Axis::Vertical).map_err(input_err)?;
        }
        PhysicalAction::Type { text } => {
            enigo.text(&text).map_err(input_err)?;
        }
        PhysicalAction::Key { key } => {
            let chord = parse_chord(&key)?;
            let (last, modifiers) = chord
                .split_last()
                .ok_or_else(|| HeatloopError::Executor(format!("empty key chord '{key}'")))?;
            for m in modifiers {
                enigo.key(*m, Direction::Press).map_err(input_err)?;
            }
            let res = enigo.key(*last, Direction::Click).map_err(input_err);
            for m in modifiers.iter().rev() {
                enigo.key(*m, Direction::Release).map_err(input_err)?;
            }
            res?;
        }
    }
    Ok(())
}

fn press_release(enigo: &mut Enigo, button: Button) -> HeatloopResult<()> {
    enigo.button(button, Direction::Press).map_err(input_err)?;
    pause(20);
    enigo.button(button, Direction::Release).map_err(input_err)
}

/// Smoothstep from the current cursor position to `(tx, ty)`.
fn smooth_move(enigo: &mut Enigo, tx: i32, ty: i32) -> HeatloopResult<()> {
    let (sx, sy) = enigo.location().map_err(input_err)?;
    for i in 0..=MOVE_STEPS {
        let t = i as f64 / MOVE_STEPS as f64;
        let t = t * t * (3.0 - 2.0 * t);
        let x = sx + ((tx - sx) as f64 * t).round() as i32;
        let y = sy + ((ty - sy) as f64 * t).round() as i32;
        enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
        std::thread::sleep(STEP_PAUSE);
    }
    Ok(())
}

/// `ctrl+shift+t` -> [Control, Shift, Unicode('t')].
pub fn parse_chord(chord: &str) -> HeatloopResult<Vec<Key>> {
    chord
        .split('+')
        .map(|part| {
            let part = part.trim();
            named_key(part).ok_or_else(|| HeatloopError::Executor(format!("unknown key '{part}'")))
        })
        .collect()
}

fn named_key(name: &str) -> Option<Key> {
    let lower = name.to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "ctrl" | "control" => Key::Control,
        "shift" => Key::Shift,
        "alt" => Key::Alt,
        "win" | "meta" | "cmd" | "super" => Key::Meta,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return None,
            }
        }
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chords_parse_modifiers_first() {
        let keys = parse_chord("Ctrl+Shift+t").unwrap();
        assert_eq!(keys, vec![Key::Control, Key::Shift, Key::Unicode('t')]);
        assert_eq!(parse_chord("enter").unwrap(), vec![Key::Return]);
        assert!(parse_chord("hyper+x").is_err());
    }

    #[tokio::test]
    async fn recording_driver_keeps_order() {
        let d = RecordingDriver::new();
        d.perform(PhysicalAction::Key { key: "tab".into() }).await.unwrap();
        d.perform(PhysicalAction::Click { x: 1, y: 2, kind: ClickKind::Left }).await.unwrap();
        assert_eq!(
            d.performed(),
            vec![
                PhysicalAction::Key { key: "tab".into() },
                PhysicalAction::Click { x: 1, y: 2, kind: ClickKind::Left },
            ]
        );
    }
}
