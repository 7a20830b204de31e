#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use heatloop_lib::config::AppConfig;
use heatloop_lib::errors::{HeatloopError, HeatloopResult};
use heatloop_lib::llm::provider::VisionModel;
use heatloop_lib::perception::codec;
use heatloop_lib::perception::traits::ScreenSource;
use heatloop_lib::perception::types::{CapturedFrame, RenderSize};
use image::{Rgba, RgbaImage};

/// Always returns the same frame.
pub struct FixedScreen(pub RgbaImage);

#[async_trait]
impl ScreenSource for FixedScreen {
    async fn capture(&self) -> HeatloopResult<CapturedFrame> {
        Ok(CapturedFrame::from_image(self.0.clone()))
    }
}

/// Takes `delay` to produce each frame.
pub struct SlowScreen {
    pub frame: RgbaImage,
    pub delay: Duration,
}

#[async_trait]
impl ScreenSource for SlowScreen {
    async fn capture(&self) -> HeatloopResult<CapturedFrame> {
        tokio::time::sleep(self.delay).await;
        Ok(CapturedFrame::from_image(self.frame.clone()))
    }
}

/// Replies from a script; once it runs out, the last reply repeats.
/// Records every (story, image) pair it was shown.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    delay: Duration,
    pub seen: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(String::new()),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Think for `delay` after seeing each image.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn seen(&self) -> Vec<(String, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, story: &str, annotated_png: &[u8]) -> HeatloopResult<String> {
        self.seen.lock().unwrap().push((story.to_string(), annotated_png.to_vec()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

/// Fails every call.
pub struct DownModel;

#[async_trait]
impl VisionModel for DownModel {
    fn name(&self) -> &str {
        "down"
    }

    async fn decide(&self, _story: &str, _png: &[u8]) -> HeatloopResult<String> {
        Err(HeatloopError::Model("connection refused".into()))
    }
}

pub fn test_config(run_dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.session.run_dir = run_dir.to_path_buf();
    cfg.session.start_paused = false;
    cfg.session.loop_delay_ms = 0;
    cfg.broker.render_timeout_ms = 2_000;
    cfg.broker.poll_interval_ms = 5;
    cfg.broker.listen = "127.0.0.1:0".parse().unwrap();
    cfg
}

pub fn gray(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba([40, 40, 40, 255]))
}

pub fn render_png(size: RenderSize) -> Vec<u8> {
    codec::encode_png(&gray(size.width, size.height)).unwrap()
}
