// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/detector.rs - 人脸检测网关
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

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use thiserror::Error;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, error, info};
use url::Url;

use crate::FromUrl;

#[cfg(feature = "seeta_detector")]
mod seeta;
#[cfg(feature = "seeta_detector")]
pub use self::seeta::{SeetaFaceError, SeetaFaceLoader, SeetaFaceModel};

#[derive(Debug, Clone)]
pub struct DetectItem {
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// 已加载、可直接推理的人脸模型
pub trait FaceModel: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(&self, gray: &GrayImage) -> Result<DetectResult, Self::Error>;
}

/// 负责异步加载模型资源
#[async_trait]
pub trait FaceModelLoader: Send + Sync + 'static {
  type Model: FaceModel;
  type Error: std::error::Error + Send + Sync + 'static;

  async fn load(&self) -> Result<Self::Model, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorStatus {
  Uninitialized,
  Loading,
  Ready,
  Unavailable,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("face detector has not been initialized")]
  Uninitialized,
  #[error("face detector is still loading")]
  StillLoading,
  #[error("face detector is unavailable")]
  Unavailable,
  #[error("face detection failed: {0}")]
  Detection(String),
}

/// 人脸检测网关。
///
/// 模型只加载一次：`initialize` 可以被并发或重复调用，加载过程只会执行一次，
/// 之后的调用直接返回已确定的状态。加载失败后所有检测调用立即返回
/// [`DetectorError::Unavailable`]，不会重试。
pub struct DetectorGateway<L: FaceModelLoader> {
  loader: L,
  model: OnceCell<Option<Arc<L::Model>>>,
  status: watch::Sender<DetectorStatus>,
}

impl<L: FaceModelLoader> DetectorGateway<L> {
  pub fn new(loader: L) -> Self {
    let (status, _) = watch::channel(DetectorStatus::Uninitialized);
    Self {
      loader,
      model: OnceCell::new(),
      status,
    }
  }

  pub fn status(&self) -> DetectorStatus {
    *self.status.borrow()
  }

  /// 订阅状态变化，界面层据此显示“加载中”而不是阻塞等待
  pub fn subscribe(&self) -> watch::Receiver<DetectorStatus> {
    self.status.subscribe()
  }

  pub async fn initialize(&self) -> DetectorStatus {
    self
      .model
      .get_or_init(|| async {
        self.status.send_replace(DetectorStatus::Loading);
        info!("正在加载人脸检测模型...");
        let now = Instant::now();
        match self.loader.load().await {
          Ok(model) => {
            info!("人脸检测模型加载完成，耗时: {:.2?}", now.elapsed());
            self.status.send_replace(DetectorStatus::Ready);
            Some(Arc::new(model))
          }
          Err(e) => {
            error!("人脸检测模型加载失败: {}", e);
            self.status.send_replace(DetectorStatus::Unavailable);
            None
          }
        }
      })
      .await;
    self.status()
  }

  /// 返回图像中检测到的人脸数量
  pub async fn detect_faces(&self, image: &DynamicImage) -> Result<usize, DetectorError> {
    let model = self.ready_model()?;
    let gray = image.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
      return Err(DetectorError::Detection("图像尺寸为零".to_string()));
    }

    let result = tokio::task::spawn_blocking(move || model.detect(&gray))
      .await
      .map_err(|e| DetectorError::Detection(e.to_string()))?
      .map_err(|e| DetectorError::Detection(e.to_string()))?;

    debug!("检测到 {} 张人脸", result.len());
    Ok(result.len())
  }

  fn ready_model(&self) -> Result<Arc<L::Model>, DetectorError> {
    match self.model.get() {
      Some(Some(model)) => Ok(Arc::clone(model)),
      Some(None) => Err(DetectorError::Unavailable),
      None => match self.status() {
        DetectorStatus::Loading => Err(DetectorError::StillLoading),
        _ => Err(DetectorError::Uninitialized),
      },
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorWrapperError {
  #[cfg(feature = "seeta_detector")]
  #[error("SeetaFace error: {0}")]
  SeetaFaceError(#[from] SeetaFaceError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的检测模型加载器
pub enum DetectorWrapper {
  #[cfg(feature = "seeta_detector")]
  Seeta(SeetaFaceLoader),
}

pub enum DetectorWrapperModel {
  #[cfg(feature = "seeta_detector")]
  Seeta(SeetaFaceModel),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorWrapperError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "seeta_detector")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == SeetaFaceLoader::SCHEME {
        return Ok(DetectorWrapper::Seeta(SeetaFaceLoader::from_url(url)?));
      }
    }
    Err(DetectorWrapperError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FaceModel for DetectorWrapperModel {
  type Error = DetectorWrapperError;

  fn detect(&self, gray: &GrayImage) -> Result<DetectResult, Self::Error> {
    match *self {
      #[cfg(feature = "seeta_detector")]
      DetectorWrapperModel::Seeta(ref model) => model.detect(gray).map_err(Into::into),
    }
  }
}

#[async_trait]
impl FaceModelLoader for DetectorWrapper {
  type Model = DetectorWrapperModel;
  type Error = DetectorWrapperError;

  async fn load(&self) -> Result<Self::Model, Self::Error> {
    match *self {
      #[cfg(feature = "seeta_detector")]
      DetectorWrapper::Seeta(ref loader) => Ok(DetectorWrapperModel::Seeta(loader.load().await?)),
    }
  }
}
