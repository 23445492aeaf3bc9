// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/roast.rs - 吐槽请求编排
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
  fmt,
  str::FromStr,
  sync::atomic::{AtomicBool, Ordering},
  time::Instant,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{session::Session, upload::UploadedImage};

mod http;
pub use self::http::HttpRoastService;

const GENERIC_FAILURE: &str = "Oops! Something went wrong. Try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoastStyle {
  #[default]
  Default,
  Pidgin,
  Patois,
}

impl RoastStyle {
  pub const ALL: [RoastStyle; 3] = [RoastStyle::Default, RoastStyle::Pidgin, RoastStyle::Patois];

  pub fn as_str(&self) -> &'static str {
    match self {
      RoastStyle::Default => "default",
      RoastStyle::Pidgin => "pidgin",
      RoastStyle::Patois => "patois",
    }
  }

  pub fn display_name(&self) -> &'static str {
    match self {
      RoastStyle::Default => "Default English",
      RoastStyle::Pidgin => "Nigerian Pidgin",
      RoastStyle::Patois => "Jamaican Patois",
    }
  }
}

impl fmt::Display for RoastStyle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RoastStyle {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    RoastStyle::ALL
      .into_iter()
      .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| format!("unknown roast style '{}', expected default|pidgin|patois", s))
  }
}

/// 发往吐槽服务的请求，两种形态分别对应单图与多图两个端点
#[derive(Debug, Clone)]
pub enum RoastRequest {
  Single {
    image: UploadedImage,
    style: RoastStyle,
  },
  Pack {
    images: Vec<UploadedImage>,
    prompt: String,
    pack_title: String,
    style: RoastStyle,
  },
}

impl RoastRequest {
  pub fn image_count(&self) -> usize {
    match self {
      RoastRequest::Single { .. } => 1,
      RoastRequest::Pack { images, .. } => images.len(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRoast {
  pub image_index: usize,
  pub roast: String,
}

/// 一次成功调用的全部结果，整体替换，从不部分更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoastResult {
  Flat(Vec<String>),
  PerImage(Vec<ImageRoast>),
}

impl RoastResult {
  pub fn len(&self) -> usize {
    match self {
      RoastResult::Flat(roasts) => roasts.len(),
      RoastResult::PerImage(roasts) => roasts.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 某张图片对应的吐槽，按服务返回的顺序
  pub fn roasts_for(&self, image_index: usize) -> Vec<&str> {
    match self {
      RoastResult::Flat(_) => Vec::new(),
      RoastResult::PerImage(roasts) => roasts
        .iter()
        .filter(|r| r.image_index == image_index)
        .map(|r| r.roast.as_str())
        .collect(),
    }
  }

  pub fn texts(&self) -> Vec<&str> {
    match self {
      RoastResult::Flat(roasts) => roasts.iter().map(String::as_str).collect(),
      RoastResult::PerImage(roasts) => roasts.iter().map(|r| r.roast.as_str()).collect(),
    }
  }
}

#[derive(Error, Debug)]
pub enum RoastError {
  #[error("a roast request is already in flight")]
  Busy,
  #[error("no images to roast")]
  EmptyInput,
  #[error("prompt needs {required} images, got {actual}")]
  InsufficientImages { required: usize, actual: usize },
  #[error("pick a pack with a question before roasting several images")]
  NoPromptSelected,
  #[error("transport error: {0}")]
  Transport(String),
  #[error("invalid response: {0}")]
  InvalidResponse(String),
  #[error("selection changed while the request was in flight")]
  Stale,
}

impl RoastError {
  pub fn user_message(&self) -> String {
    match self {
      RoastError::Busy => "Roasting... hold on.".to_string(),
      RoastError::EmptyInput => "Upload a picture first.".to_string(),
      RoastError::InsufficientImages { required, actual } => format!(
        "This prompt needs {} pictures, you uploaded {}.",
        required, actual
      ),
      RoastError::NoPromptSelected => "Pick a pack first.".to_string(),
      RoastError::Stale => "Your selection changed, roast again.".to_string(),
      RoastError::Transport(_) | RoastError::InvalidResponse(_) => GENERIC_FAILURE.to_string(),
    }
  }
}

/// 远端吐槽生成服务，返回原始 JSON 响应体
#[async_trait]
pub trait RoastService: Send + Sync {
  async fn send(&self, request: &RoastRequest) -> Result<serde_json::Value, RoastError>;
}

#[derive(Deserialize)]
struct FlatRoasts {
  roasts: Vec<String>,
}

#[derive(Deserialize)]
struct IndexedRoasts {
  roasts: Vec<IndexedRoast>,
}

#[derive(Deserialize)]
struct IndexedRoast {
  #[serde(rename = "imageIndex")]
  image_index: usize,
  roast: String,
}

/// 校验响应体并映射为结果
pub fn map_response(
  request: &RoastRequest,
  body: serde_json::Value,
) -> Result<RoastResult, RoastError> {
  let result = match request {
    RoastRequest::Single { .. } => {
      let FlatRoasts { roasts } = serde_json::from_value(body)
        .map_err(|e| RoastError::InvalidResponse(e.to_string()))?;
      RoastResult::Flat(roasts)
    }
    RoastRequest::Pack { images, .. } => {
      let IndexedRoasts { roasts } = serde_json::from_value(body)
        .map_err(|e| RoastError::InvalidResponse(e.to_string()))?;
      if let Some(bad) = roasts.iter().find(|r| r.image_index >= images.len()) {
        return Err(RoastError::InvalidResponse(format!(
          "imageIndex {} out of range for {} images",
          bad.image_index,
          images.len()
        )));
      }
      RoastResult::PerImage(
        roasts
          .into_iter()
          .map(|r| ImageRoast {
            image_index: r.image_index,
            roast: r.roast,
          })
          .collect(),
      )
    }
  };

  if result.is_empty() {
    return Err(RoastError::InvalidResponse("response contains no roasts".to_string()));
  }
  Ok(result)
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// 吐槽编排器。
///
/// 同一时刻最多一个请求在途：请求挂起期间的新调用直接返回 [`RoastError::Busy`]，
/// 不排队。失败时会话状态保持不变，也不会自动重试。
pub struct RoastOrchestrator<S> {
  service: S,
  in_flight: AtomicBool,
}

impl<S: RoastService> RoastOrchestrator<S> {
  pub fn new(service: S) -> Self {
    Self {
      service,
      in_flight: AtomicBool::new(false),
    }
  }

  pub fn service(&self) -> &S {
    &self.service
  }

  pub fn is_pending(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst)
  }

  fn begin(&self) -> Result<InFlight<'_>, RoastError> {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      warn!("已有吐槽请求在途，拒绝新的请求");
      return Err(RoastError::Busy);
    }
    Ok(InFlight(&self.in_flight))
  }

  /// 根据会话构造请求、发送并在成功时写回结果。
  ///
  /// 请求在途期间会话若被修改（换卡包、换题或换图），结果不会写回，
  /// 返回 [`RoastError::Stale`]。
  pub async fn generate(&self, session: &Mutex<Session>) -> Result<RoastResult, RoastError> {
    let _guard = self.begin()?;
    let (request, epoch) = {
      let session = session.lock().await;
      (build_request(&session)?, session.epoch())
    };

    let result = self.dispatch(&request).await?;
    let mut session = session.lock().await;
    if session.epoch() != epoch {
      warn!(
        "会话已变化 ({} -> {})，丢弃过期的吐槽结果",
        epoch,
        session.epoch()
      );
      return Err(RoastError::Stale);
    }
    session.commit_results(result.clone());
    Ok(result)
  }

  /// 直接发送一个已构造好的请求，不涉及会话状态。
  ///
  /// 只检查请求非空；图片数量与提示词要求是否匹配由调用方负责，
  /// 需要这些前置检查时使用 [`RoastOrchestrator::generate`]。
  pub async fn request(&self, request: &RoastRequest) -> Result<RoastResult, RoastError> {
    let _guard = self.begin()?;
    if request.image_count() == 0 {
      return Err(RoastError::EmptyInput);
    }
    self.dispatch(request).await
  }

  async fn dispatch(&self, request: &RoastRequest) -> Result<RoastResult, RoastError> {
    info!("发送吐槽请求: {} 张图片", request.image_count());
    let now = Instant::now();
    let body = self.service.send(request).await.inspect_err(|e| {
      error!("吐槽请求失败: {}", e);
    })?;
    let result = map_response(request, body).inspect_err(|e| {
      error!("吐槽响应无效: {}", e);
    })?;
    info!("收到 {} 条吐槽，耗时: {:.2?}", result.len(), now.elapsed());
    Ok(result)
  }
}

fn build_request(session: &Session) -> Result<RoastRequest, RoastError> {
  let images = session.images();
  if images.is_empty() {
    return Err(RoastError::EmptyInput);
  }

  match (session.pack(), session.prompt()) {
    (Some(pack), Some(prompt)) => {
      let required = session.required_images();
      if images.len() < required {
        return Err(RoastError::InsufficientImages {
          required,
          actual: images.len(),
        });
      }
      debug!("卡包请求: {} / {}", pack.title, prompt.text());
      Ok(RoastRequest::Pack {
        images: images.to_vec(),
        prompt: prompt.text().to_string(),
        pack_title: pack.title.clone(),
        style: session.style(),
      })
    }
    (Some(_), None) => Err(RoastError::NoPromptSelected),
    (None, _) if images.len() > 1 => Err(RoastError::NoPromptSelected),
    (None, _) => Ok(RoastRequest::Single {
      image: images[0].clone(),
      style: session.style(),
    }),
  }
}
