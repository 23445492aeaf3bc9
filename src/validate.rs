// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/validate.rs - 上传图像的人脸校验
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
  collections::BTreeMap,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
  },
};

use image::DynamicImage;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
  detector::{DetectorError, DetectorGateway, DetectorStatus, FaceModelLoader},
  upload::UploadedImage,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
  NoFaceDetected,
  UnreadableImage,
  DetectorUnavailable,
}

impl fmt::Display for RejectReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RejectReason::NoFaceDetected => write!(f, "no face detected"),
      RejectReason::UnreadableImage => write!(f, "unreadable image"),
      RejectReason::DetectorUnavailable => write!(f, "face detector unavailable"),
    }
  }
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
  Accepted(UploadedImage),
  Rejected(UploadedImage, RejectReason),
}

impl ValidationOutcome {
  pub fn image(&self) -> &UploadedImage {
    match self {
      ValidationOutcome::Accepted(image) | ValidationOutcome::Rejected(image, _) => image,
    }
  }

  pub fn is_accepted(&self) -> bool {
    matches!(self, ValidationOutcome::Accepted(_))
  }

  pub fn reason(&self) -> Option<RejectReason> {
    match self {
      ValidationOutcome::Accepted(_) => None,
      ValidationOutcome::Rejected(_, reason) => Some(*reason),
    }
  }

  /// 面向用户的跳过提示
  pub fn notice(&self) -> Option<String> {
    let name = self.image().filename();
    self.reason().map(|reason| match reason {
      RejectReason::NoFaceDetected => {
        format!("No faces detected in one of the images! Skipping: {}", name)
      }
      RejectReason::UnreadableImage => {
        format!("Invalid image file: {}. Please upload a valid image.", name)
      }
      RejectReason::DetectorUnavailable => {
        format!("Face detection is unavailable. Skipping: {}", name)
      }
    })
  }
}

/// 单图流程与多图（卡包）流程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
  #[default]
  Single,
  Multi,
}

#[derive(Error, Debug)]
pub enum ValidationError {
  #[error("Model loading failed or is still in progress. Please try again later.")]
  DetectorLoading,
  #[error("Please upload more than one image.")]
  NeedsMoreImages { outcomes: Vec<ValidationOutcome> },
  #[error("validation batch was superseded by a newer upload")]
  Superseded,
}

/// 一批校验结果，顺序与输入一致
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
  outcomes: Vec<ValidationOutcome>,
}

impl ValidatedBatch {
  pub fn outcomes(&self) -> &[ValidationOutcome] {
    &self.outcomes
  }

  pub fn into_outcomes(self) -> Vec<ValidationOutcome> {
    self.outcomes
  }

  pub fn len(&self) -> usize {
    self.outcomes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outcomes.is_empty()
  }

  pub fn accepted(&self) -> Vec<UploadedImage> {
    self
      .outcomes
      .iter()
      .filter_map(|outcome| match outcome {
        ValidationOutcome::Accepted(image) => Some(image.clone()),
        ValidationOutcome::Rejected(..) => None,
      })
      .collect()
  }

  pub fn accepted_count(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_accepted()).count()
  }

  pub fn rejections(&self) -> impl Iterator<Item = &ValidationOutcome> {
    self.outcomes.iter().filter(|o| !o.is_accepted())
  }
}

/// 使正在进行的校验批次失效
#[derive(Debug, Clone)]
pub struct CancelHandle {
  generation: Arc<AtomicU64>,
}

impl CancelHandle {
  pub fn cancel(&self) {
    self.generation.fetch_add(1, Ordering::SeqCst);
  }
}

/// 解码后的图像。持有期间计入活跃句柄数，离开作用域即释放。
struct DecodeHandle {
  image: DynamicImage,
  live: Arc<AtomicUsize>,
}

impl DecodeHandle {
  async fn decode(file: &UploadedImage, live: &Arc<AtomicUsize>) -> Result<Self, String> {
    let data = file.shared_data();
    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
      .await
      .map_err(|e| e.to_string())?
      .map_err(|e| e.to_string())?;
    live.fetch_add(1, Ordering::SeqCst);
    Ok(Self {
      image,
      live: Arc::clone(live),
    })
  }

  fn image(&self) -> &DynamicImage {
    &self.image
  }
}

impl Drop for DecodeHandle {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

pub struct ImageValidator<L: FaceModelLoader> {
  gateway: Arc<DetectorGateway<L>>,
  concurrency: usize,
  generation: Arc<AtomicU64>,
  live_handles: Arc<AtomicUsize>,
}

impl<L: FaceModelLoader> ImageValidator<L> {
  pub fn new(gateway: Arc<DetectorGateway<L>>) -> Self {
    Self {
      gateway,
      concurrency: DEFAULT_CONCURRENCY,
      generation: Arc::new(AtomicU64::new(0)),
      live_handles: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  pub fn gateway(&self) -> &Arc<DetectorGateway<L>> {
    &self.gateway
  }

  pub fn cancel_handle(&self) -> CancelHandle {
    CancelHandle {
      generation: Arc::clone(&self.generation),
    }
  }

  /// 当前尚未释放的解码句柄数量
  pub fn live_handles(&self) -> usize {
    self.live_handles.load(Ordering::SeqCst)
  }

  /// 校验一批文件，输出与输入一一对应且顺序相同。
  ///
  /// 每个文件在独立任务中解码并检测，任务带着原始下标运行，全部完成后按下标重组，
  /// 与完成顺序无关。新的调用会使尚未完成的旧批次失效，旧批次返回
  /// [`ValidationError::Superseded`]。多图模式下只有一张图像通过时整批作废。
  pub async fn validate_batch(
    &self,
    files: Vec<UploadedImage>,
    mode: BatchMode,
  ) -> Result<ValidatedBatch, ValidationError> {
    match self.gateway.status() {
      DetectorStatus::Uninitialized | DetectorStatus::Loading => {
        warn!("人脸检测模型尚未就绪，拒绝本次上传");
        return Err(ValidationError::DetectorLoading);
      }
      DetectorStatus::Ready | DetectorStatus::Unavailable => {}
    }

    let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let total = files.len();
    info!("开始校验 {} 张图像 (批次 {})", total, ticket);

    let semaphore = Arc::new(Semaphore::new(self.concurrency));
    let mut tasks = JoinSet::new();
    for (index, file) in files.iter().cloned().enumerate() {
      let gateway = Arc::clone(&self.gateway);
      let semaphore = Arc::clone(&semaphore);
      let generation = Arc::clone(&self.generation);
      let live = Arc::clone(&self.live_handles);

      tasks.spawn(async move {
        let _permit = semaphore.acquire_owned().await.ok();
        if generation.load(Ordering::SeqCst) != ticket {
          return (index, None);
        }
        let outcome = validate_one(&gateway, file, &live).await;
        (index, Some(outcome))
      });
    }

    let mut slots = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((index, Some(outcome))) => {
          slots.insert(index, outcome);
        }
        Ok((index, None)) => debug!("第 {} 张图像的校验已取消", index),
        Err(e) => error!("校验任务异常退出: {}", e),
      }
    }

    if self.generation.load(Ordering::SeqCst) != ticket {
      warn!("批次 {} 已被新的上传取代，丢弃结果", ticket);
      return Err(ValidationError::Superseded);
    }

    let outcomes: Vec<ValidationOutcome> = files
      .into_iter()
      .enumerate()
      .map(|(index, file)| {
        slots
          .remove(&index)
          .unwrap_or(ValidationOutcome::Rejected(file, RejectReason::UnreadableImage))
      })
      .collect();

    let batch = ValidatedBatch { outcomes };
    info!(
      "批次 {} 校验完成: {} 张通过, {} 张被拒绝",
      ticket,
      batch.accepted_count(),
      batch.len() - batch.accepted_count()
    );

    if mode == BatchMode::Multi && batch.accepted_count() == 1 {
      warn!("多图模式下只有一张图像包含人脸");
      return Err(ValidationError::NeedsMoreImages {
        outcomes: batch.into_outcomes(),
      });
    }

    Ok(batch)
  }
}

async fn validate_one<L: FaceModelLoader>(
  gateway: &DetectorGateway<L>,
  file: UploadedImage,
  live: &Arc<AtomicUsize>,
) -> ValidationOutcome {
  let handle = match DecodeHandle::decode(&file, live).await {
    Ok(handle) => handle,
    Err(e) => {
      warn!("无法解码图像 {}: {}", file.filename(), e);
      return ValidationOutcome::Rejected(file, RejectReason::UnreadableImage);
    }
  };

  let detected = gateway.detect_faces(handle.image()).await;
  drop(handle);

  match detected {
    Ok(0) => {
      warn!("图像中未检测到人脸，跳过: {}", file.filename());
      ValidationOutcome::Rejected(file, RejectReason::NoFaceDetected)
    }
    Ok(count) => {
      debug!("{}: 检测到 {} 张人脸", file.filename(), count);
      ValidationOutcome::Accepted(file)
    }
    Err(DetectorError::Detection(e)) => {
      warn!("人脸检测失败 {}: {}", file.filename(), e);
      ValidationOutcome::Rejected(file, RejectReason::UnreadableImage)
    }
    Err(e) => {
      warn!("人脸检测不可用 {}: {}", file.filename(), e);
      ValidationOutcome::Rejected(file, RejectReason::DetectorUnavailable)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::test_helpers::{FakeLoader, blank_upload, face_upload, garbage_upload, narrow_upload};

  async fn ready_validator(loader: FakeLoader) -> ImageValidator<FakeLoader> {
    let gateway = Arc::new(DetectorGateway::new(loader));
    gateway.initialize().await;
    ImageValidator::new(gateway)
  }

  fn names(outcomes: &[ValidationOutcome]) -> Vec<&str> {
    outcomes.iter().map(|o| o.image().filename()).collect()
  }

  #[tokio::test]
  async fn output_matches_input_length_and_order() {
    let validator = ready_validator(FakeLoader::ready()).await.with_concurrency(3);
    let files = vec![
      face_upload("a.png"),
      blank_upload("b.png"),
      garbage_upload("c.png"),
      face_upload("d.png"),
      blank_upload("e.png"),
    ];

    let batch = validator
      .validate_batch(files, BatchMode::Single)
      .await
      .unwrap();

    assert_eq!(names(batch.outcomes()), ["a.png", "b.png", "c.png", "d.png", "e.png"]);
    let reasons: Vec<_> = batch.outcomes().iter().map(|o| o.reason()).collect();
    assert_eq!(
      reasons,
      [
        None,
        Some(RejectReason::NoFaceDetected),
        Some(RejectReason::UnreadableImage),
        None,
        Some(RejectReason::NoFaceDetected),
      ]
    );
    assert_eq!(batch.accepted_count(), 2);
    assert_eq!(validator.live_handles(), 0);
  }

  #[tokio::test]
  async fn detection_error_releases_the_decoded_image() {
    let validator = ready_validator(FakeLoader::ready()).await;
    let batch = validator
      .validate_batch(
        vec![narrow_upload("sliver.png"), face_upload("face.png")],
        BatchMode::Single,
      )
      .await
      .unwrap();

    assert_eq!(
      batch.outcomes()[0].reason(),
      Some(RejectReason::UnreadableImage)
    );
    assert!(batch.outcomes()[1].is_accepted());
    assert_eq!(validator.live_handles(), 0);
  }

  #[tokio::test]
  async fn undecodable_file_is_unreadable_even_without_detector() {
    let validator = ready_validator(FakeLoader::failing()).await;
    let batch = validator
      .validate_batch(
        vec![garbage_upload("junk.bin"), face_upload("face.png")],
        BatchMode::Single,
      )
      .await
      .unwrap();

    assert_eq!(
      batch.outcomes()[0].reason(),
      Some(RejectReason::UnreadableImage)
    );
    assert_eq!(
      batch.outcomes()[1].reason(),
      Some(RejectReason::DetectorUnavailable)
    );
  }

  #[tokio::test]
  async fn upload_is_refused_while_detector_is_not_ready() {
    let gateway = Arc::new(DetectorGateway::new(FakeLoader::ready()));
    let validator = ImageValidator::new(gateway);
    let err = validator
      .validate_batch(vec![face_upload("a.png")], BatchMode::Single)
      .await
      .unwrap_err();
    assert!(matches!(err, ValidationError::DetectorLoading));
  }

  #[tokio::test]
  async fn multi_batch_with_one_face_needs_more_images() {
    let validator = ready_validator(FakeLoader::ready()).await;
    let err = validator
      .validate_batch(
        vec![face_upload("me.png"), blank_upload("wall.png")],
        BatchMode::Multi,
      )
      .await
      .unwrap_err();

    match err {
      ValidationError::NeedsMoreImages { outcomes } => assert_eq!(outcomes.len(), 2),
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn single_batch_with_one_face_is_fine() {
    let validator = ready_validator(FakeLoader::ready()).await;
    let batch = validator
      .validate_batch(
        vec![face_upload("me.png"), blank_upload("wall.png")],
        BatchMode::Single,
      )
      .await
      .unwrap();
    assert_eq!(batch.accepted().len(), 1);
  }

  #[tokio::test]
  async fn multi_batch_with_no_faces_rejects_every_file() {
    let validator = ready_validator(FakeLoader::ready()).await;
    let batch = validator
      .validate_batch(
        vec![blank_upload("x.png"), garbage_upload("y.png"), blank_upload("z.png")],
        BatchMode::Multi,
      )
      .await
      .unwrap();

    assert!(batch.accepted().is_empty());
    assert_eq!(batch.rejections().count(), 3);
  }

  #[tokio::test]
  async fn newer_batch_supersedes_older_one() {
    let validator = Arc::new(
      ready_validator(FakeLoader::ready().with_detect_delay(Duration::from_millis(150)))
        .await
        .with_concurrency(1),
    );

    let stale = tokio::spawn({
      let validator = Arc::clone(&validator);
      async move {
        validator
          .validate_batch(
            vec![face_upload("old1.png"), face_upload("old2.png")],
            BatchMode::Single,
          )
          .await
      }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let fresh = validator
      .validate_batch(vec![face_upload("new.png")], BatchMode::Single)
      .await
      .unwrap();

    assert_eq!(names(fresh.outcomes()), ["new.png"]);
    assert!(matches!(
      stale.await.unwrap(),
      Err(ValidationError::Superseded)
    ));
    assert_eq!(validator.live_handles(), 0);
  }

  #[tokio::test]
  async fn cancel_handle_abandons_running_batch() {
    let validator = Arc::new(
      ready_validator(FakeLoader::ready().with_detect_delay(Duration::from_millis(100)))
        .await
        .with_concurrency(1),
    );
    let cancel = validator.cancel_handle();

    let running = tokio::spawn({
      let validator = Arc::clone(&validator);
      async move {
        validator
          .validate_batch(
            vec![face_upload("1.png"), face_upload("2.png"), face_upload("3.png")],
            BatchMode::Multi,
          )
          .await
      }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert!(matches!(
      running.await.unwrap(),
      Err(ValidationError::Superseded)
    ));
  }

  #[test]
  fn notices_name_the_skipped_file() {
    let outcome = ValidationOutcome::Rejected(blank_upload("cat.png"), RejectReason::NoFaceDetected);
    assert_eq!(
      outcome.notice().unwrap(),
      "No faces detected in one of the images! Skipping: cat.png"
    );
    assert!(ValidationOutcome::Accepted(face_upload("me.png")).notice().is_none());
  }
}
