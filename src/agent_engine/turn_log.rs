use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Action;
use crate::errors::HeatloopResult;
use crate::perception::types::CropRegion;

const CROP_FILE: &str = "crop.json";
const TURNS_FILE: &str = "turns.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub seq: u64,
    pub ts: i64,
    pub latency_ms: u64,
    pub actions: Vec<Action>,
    pub malformed: Vec<String>,
    pub executed: Vec<String>,
    pub story: String,
}

/// Per-session run directory: `turns.jsonl` plus one `turn_NNNN.png` per
/// completed turn. The crop file lives one level up so it outlives sessions.
pub struct TurnLog {
    pub session_id: String,
    root: PathBuf,
    dir: PathBuf,
}

impl TurnLog {
    pub fn create(run_dir: &Path) -> HeatloopResult<Self> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = run_dir.join(format!("session_{session_id}"));
        std::fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "turn log created");
        Ok(Self { session_id, root: run_dir.to_path_buf(), dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_path(&self, turn: u64) -> PathBuf {
        self.dir.join(format!("turn_{turn:04}.png"))
    }

    /// Append `record` to `turns.jsonl` and write the annotated image beside it.
    pub fn append(&self, record: &TurnRecord, annotated_png: &[u8]) -> HeatloopResult<()> {
        std::fs::write(self.image_path(record.turn), annotated_png)?;
        let line = serde_json::to_string(record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(TURNS_FILE))?;
        writeln!(file, "{line}")?;
        tracing::debug!(turn = record.turn, "turn record flushed");
        Ok(())
    }

    pub fn read_records(&self) -> HeatloopResult<Vec<TurnRecord>> {
        let path = self.dir.join(TURNS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        std::fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }

    pub fn load_crop(&self) -> Option<CropRegion> {
        load_crop(&self.root)
    }

    pub fn save_crop(&self, crop: Option<CropRegion>) -> HeatloopResult<()> {
        save_crop(&self.root, crop)
    }
}

/// `None` when the file is absent or unreadable; both mean full screen.
pub fn load_crop(run_dir: &Path) -> Option<CropRegion> {
    let path = run_dir.join(CROP_FILE);
    let text = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<CropRegion>(&text) {
        Ok(crop) if !crop.is_empty() => Some(crop),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "crop file has no area; using full screen");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "crop file unreadable; using full screen");
            None
        }
    }
}

/// Writes the crop, or removes the file for `None`.
pub fn save_crop(run_dir: &Path, crop: Option<CropRegion>) -> HeatloopResult<()> {
    let path = run_dir.join(CROP_FILE);
    match crop {
        Some(c) => {
            std::fs::create_dir_all(run_dir)?;
            std::fs::write(&path, serde_json::to_string_pretty(&c)?)?;
        }
        None => {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}
