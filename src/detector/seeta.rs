// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/detector/seeta.rs - SeetaFace 人脸检测后端
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

use std::{io::Cursor, path::PathBuf};

use async_trait::async_trait;
use image::GrayImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::{DetectItem, DetectResult, FaceModel, FaceModelLoader},
  url_to_path,
};

const SEETA_MIN_FACE_SIZE: u32 = 20;
const SEETA_SCORE_THRESH: f64 = 2.0;
const SEETA_PYRAMID_SCALE: f32 = 0.8;
const SEETA_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum SeetaFaceError {
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
}

/// 从 `seeta:///path/to/seeta_fd_frontal_v1.0.bin?min_face_size=40` 加载模型
pub struct SeetaFaceLoader {
  model_path: PathBuf,
  min_face_size: u32,
}

impl FromUrlWithScheme for SeetaFaceLoader {
  const SCHEME: &'static str = "seeta";
}

impl FromUrl for SeetaFaceLoader {
  type Error = SeetaFaceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(SeetaFaceError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut min_face_size = SEETA_MIN_FACE_SIZE;
    for (k, v) in url.query_pairs() {
      if k == "min_face_size" {
        min_face_size = v
          .parse()
          .map_err(|_| SeetaFaceError::InvalidParameter(format!("min_face_size={}", v)))?;
      }
    }

    Ok(SeetaFaceLoader {
      model_path: url_to_path(url),
      min_face_size,
    })
  }
}

#[async_trait]
impl FaceModelLoader for SeetaFaceLoader {
  type Model = SeetaFaceModel;
  type Error = SeetaFaceError;

  async fn load(&self) -> Result<Self::Model, Self::Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = tokio::fs::read(&self.model_path).await?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let model = tokio::task::spawn_blocking(move || rustface::read_model(Cursor::new(model_data)))
      .await
      .map_err(|e| SeetaFaceError::ModelInvalid(e.to_string()))?
      .map_err(|e| SeetaFaceError::ModelInvalid(e.to_string()))?;

    Ok(SeetaFaceModel {
      model,
      min_face_size: self.min_face_size,
    })
  }
}

pub struct SeetaFaceModel {
  model: rustface::Model,
  min_face_size: u32,
}

impl FaceModel for SeetaFaceModel {
  type Error = SeetaFaceError;

  fn detect(&self, gray: &GrayImage) -> Result<DetectResult, Self::Error> {
    let (width, height) = gray.dimensions();
    if width < self.min_face_size || height < self.min_face_size {
      debug!("图像 {}x{} 小于最小人脸尺寸，跳过检测", width, height);
      return Ok(DetectResult::default());
    }

    // 检测器内部带有可变状态，每次调用单独创建
    let mut detector = rustface::create_detector_with_model(self.model.clone());
    detector.set_min_face_size(self.min_face_size);
    detector.set_score_thresh(SEETA_SCORE_THRESH);
    detector.set_pyramid_scale_factor(SEETA_PYRAMID_SCALE);
    detector.set_slide_window_step(SEETA_WINDOW_STEP, SEETA_WINDOW_STEP);

    let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

    let (w, h) = (width as f32, height as f32);
    let items: Vec<DetectItem> = faces
      .iter()
      .map(|face| {
        let bbox = face.bbox();
        let x_min = bbox.x().max(0) as f32;
        let y_min = bbox.y().max(0) as f32;
        DetectItem {
          score: face.score() as f32,
          bbox: [
            (x_min / w).clamp(0.0, 1.0),
            (y_min / h).clamp(0.0, 1.0),
            ((x_min + bbox.width() as f32) / w).clamp(0.0, 1.0),
            ((y_min + bbox.height() as f32) / h).clamp(0.0, 1.0),
          ],
        }
      })
      .collect();

    debug!("SeetaFace 检测结果: {:?}", items);
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}
