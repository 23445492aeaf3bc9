// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/test_helpers.rs - 单元测试共用的假模型、假服务与图像构造
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 RoastMyFace contributors

use std::{
  collections::VecDeque,
  io::Cursor,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use thiserror::Error;
use tokio::sync::Notify;

use crate::{
  detector::{DetectItem, DetectResult, FaceModel, FaceModelLoader},
  roast::{RoastError, RoastRequest, RoastService},
  upload::UploadedImage,
};

// =========================================================================
// 图像
// =========================================================================

pub fn solid_image(luma: u8) -> DynamicImage {
  DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([luma])))
}

pub fn png_bytes(luma: u8) -> Vec<u8> {
  let mut buffer = Cursor::new(Vec::new());
  solid_image(luma)
    .write_to(&mut buffer, ImageFormat::Png)
    .unwrap();
  buffer.into_inner()
}

/// 白色图像：假模型会在其中检测到人脸
pub fn face_upload(name: &str) -> UploadedImage {
  UploadedImage::new(png_bytes(255), name)
}

/// 黑色图像：没有人脸
pub fn blank_upload(name: &str) -> UploadedImage {
  UploadedImage::new(png_bytes(0), name)
}

/// 只有一个像素宽：能解码，但假模型检测时报错
pub fn narrow_upload(name: &str) -> UploadedImage {
  let mut buffer = Cursor::new(Vec::new());
  DynamicImage::ImageLuma8(GrayImage::from_pixel(1, 8, Luma([255])))
    .write_to(&mut buffer, ImageFormat::Png)
    .unwrap();
  UploadedImage::new(buffer.into_inner(), name)
}

pub fn garbage_upload(name: &str) -> UploadedImage {
  UploadedImage::new(b"definitely not an image".to_vec(), name)
}

// =========================================================================
// 检测模型
// =========================================================================

#[derive(Error, Debug)]
pub enum FakeModelError {
  #[error("fake model cannot load")]
  LoadFailed,
  #[error("image too narrow for fake model")]
  TooNarrow,
}

/// 根据左上角像素亮度“检测”人脸：亮度 / 64 张脸
pub struct FakeModel {
  delay: Duration,
}

impl FaceModel for FakeModel {
  type Error = FakeModelError;

  fn detect(&self, gray: &GrayImage) -> Result<DetectResult, Self::Error> {
    if gray.width() < 2 {
      return Err(FakeModelError::TooNarrow);
    }
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    let faces = gray.get_pixel(0, 0)[0] as usize / 64;
    let items: Vec<DetectItem> = (0..faces)
      .map(|_| DetectItem {
        score: 0.9,
        bbox: [0.1, 0.1, 0.5, 0.5],
      })
      .collect();
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

pub struct FakeLoader {
  pub loads: Arc<AtomicUsize>,
  fail: bool,
  load_delay: Duration,
  detect_delay: Duration,
}

impl FakeLoader {
  pub fn ready() -> Self {
    Self {
      loads: Arc::new(AtomicUsize::new(0)),
      fail: false,
      load_delay: Duration::ZERO,
      detect_delay: Duration::ZERO,
    }
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::ready()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.load_delay = delay;
    self
  }

  pub fn with_detect_delay(mut self, delay: Duration) -> Self {
    self.detect_delay = delay;
    self
  }
}

#[async_trait]
impl FaceModelLoader for FakeLoader {
  type Model = FakeModel;
  type Error = FakeModelError;

  async fn load(&self) -> Result<Self::Model, Self::Error> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    if !self.load_delay.is_zero() {
      tokio::time::sleep(self.load_delay).await;
    }
    if self.fail {
      return Err(FakeModelError::LoadFailed);
    }
    Ok(FakeModel {
      delay: self.detect_delay,
    })
  }
}

// =========================================================================
// 吐槽服务
// =========================================================================

/// 按顺序返回预设响应的服务。设置 `gate` 后请求会挂起直到被放行。
#[derive(Default)]
pub struct ScriptedService {
  responses: Mutex<VecDeque<Result<serde_json::Value, RoastError>>>,
  pub requests: Mutex<Vec<RoastRequest>>,
  pub started: Arc<Notify>,
  pub gate: Option<Arc<Notify>>,
}

impl ScriptedService {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(self, response: serde_json::Value) -> Self {
    self.responses.lock().unwrap().push_back(Ok(response));
    self
  }

  pub fn fail(self, error: RoastError) -> Self {
    self.responses.lock().unwrap().push_back(Err(error));
    self
  }

  pub fn gated(mut self, gate: Arc<Notify>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }
}

#[async_trait]
impl RoastService for ScriptedService {
  async fn send(&self, request: &RoastRequest) -> Result<serde_json::Value, RoastError> {
    self.requests.lock().unwrap().push(request.clone());
    self.started.notify_one();
    if let Some(gate) = &self.gate {
      gate.notified().await;
    }
    self
      .responses
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Err(RoastError::Transport("no scripted response".to_string())))
  }
}
