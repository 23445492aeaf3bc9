// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/task.rs - 流水线任务：校验 → 选题 → 吐槽 → 组合 → 导出 → 分享
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

use anyhow::{Context, bail};
use async_trait::async_trait;
use rand::{SeedableRng, rngs::StdRng};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
  catalog::Pack,
  compose::RoastCard,
  detector::{DetectorStatus, FaceModelLoader},
  output::{Exporter, ShareOutcome, ShareTarget},
  roast::{RoastOrchestrator, RoastResult, RoastService, RoastStyle},
  session::Session,
  upload::UploadedImage,
  validate::{BatchMode, ImageValidator, ValidatedBatch, ValidationError},
};

/// 一次完整运行的结果
#[derive(Debug)]
pub struct TaskReport {
  pub notices: Vec<String>,
  pub prompt: Option<String>,
  pub result: RoastResult,
  pub delivery: ShareOutcome,
}

/// 串起各阶段的组件与会话状态
pub struct Pipeline<L: FaceModelLoader, S: RoastService> {
  validator: ImageValidator<L>,
  orchestrator: RoastOrchestrator<S>,
  exporter: Arc<Exporter>,
  share: ShareTarget,
  session: Mutex<Session>,
}

impl<L: FaceModelLoader, S: RoastService> Pipeline<L, S> {
  pub fn new(
    validator: ImageValidator<L>,
    orchestrator: RoastOrchestrator<S>,
    exporter: Exporter,
    share: ShareTarget,
  ) -> Self {
    Self {
      validator,
      orchestrator,
      exporter: Arc::new(exporter),
      share,
      session: Mutex::new(Session::default()),
    }
  }

  pub fn validator(&self) -> &ImageValidator<L> {
    &self.validator
  }

  pub fn orchestrator(&self) -> &RoastOrchestrator<S> {
    &self.orchestrator
  }

  pub fn session(&self) -> &Mutex<Session> {
    &self.session
  }

  /// 加载检测模型，失败时仍可继续，上传的图片会被拒绝
  pub async fn initialize(&self) -> DetectorStatus {
    let status = self.validator.gateway().initialize().await;
    if status == DetectorStatus::Unavailable {
      warn!("人脸检测不可用，所有图片都会被拒绝");
    }
    status
  }

  async fn validate(
    &self,
    files: Vec<UploadedImage>,
    mode: BatchMode,
    notices: &mut Vec<String>,
  ) -> anyhow::Result<ValidatedBatch> {
    let batch = match self.validator.validate_batch(files, mode).await {
      Ok(batch) => batch,
      Err(ValidationError::NeedsMoreImages { outcomes }) => {
        notices.extend(outcomes.iter().filter_map(|o| o.notice()));
        bail!(ValidationError::NeedsMoreImages { outcomes });
      }
      Err(e) => return Err(e.into()),
    };

    for notice in batch.rejections().filter_map(|o| o.notice()) {
      warn!("{}", notice);
      notices.push(notice);
    }
    Ok(batch)
  }

  async fn generate_and_deliver(&self, notices: Vec<String>) -> anyhow::Result<TaskReport> {
    let result = self
      .orchestrator
      .generate(&self.session)
      .await
      .map_err(|e| {
        let message = e.user_message();
        anyhow::Error::new(e).context(message)
      })?;

    let (card, prompt) = {
      let session = self.session.lock().await;
      let card = RoastCard::from_session(&session)
        .build()
        .context("无法组合吐槽卡片")?;
      (card, session.prompt().map(|p| p.text().to_string()))
    };

    let artifact = Arc::clone(&self.exporter)
      .export_owned(card)
      .await
      .context("导出图片失败")?;
    let delivery = self.share.deliver(&artifact).await.context("分享图片失败")?;

    Ok(TaskReport {
      notices,
      prompt,
      result,
      delivery,
    })
  }
}

#[async_trait]
pub trait Task<L: FaceModelLoader, S: RoastService>: Sized {
  async fn run_task(
    self,
    pipeline: &Pipeline<L, S>,
    files: Vec<UploadedImage>,
  ) -> anyhow::Result<TaskReport>;
}

/// 单图流程：选择风格，一张图片
pub struct SingleRoastTask {
  style: RoastStyle,
}

impl SingleRoastTask {
  pub fn new(style: RoastStyle) -> Self {
    Self { style }
  }
}

#[async_trait]
impl<L: FaceModelLoader, S: RoastService> Task<L, S> for SingleRoastTask {
  async fn run_task(
    self,
    pipeline: &Pipeline<L, S>,
    files: Vec<UploadedImage>,
  ) -> anyhow::Result<TaskReport> {
    info!("开始单图吐槽任务，风格: {}", self.style.display_name());
    let now = Instant::now();
    let mut notices = Vec::new();

    let batch = pipeline
      .validate(files, BatchMode::Single, &mut notices)
      .await?;
    {
      let mut session = pipeline.session.lock().await;
      session.set_style(self.style);
      if session.accept_batch(&batch) == 0 {
        bail!("没有包含人脸的图片");
      }
    }

    let report = pipeline.generate_and_deliver(notices).await?;
    info!("任务完成，耗时: {:.2?}", now.elapsed());
    Ok(report)
  }
}

/// 卡包流程：随机问题，可换题，多张图片
pub struct PackRoastTask {
  pack: Pack,
  rerolls: usize,
  style: RoastStyle,
  seed: Option<u64>,
}

impl PackRoastTask {
  pub fn new(pack: Pack) -> Self {
    Self {
      pack,
      rerolls: 0,
      style: RoastStyle::Default,
      seed: None,
    }
  }

  pub fn with_rerolls(mut self, rerolls: usize) -> Self {
    self.rerolls = rerolls;
    self
  }

  pub fn with_style(mut self, style: RoastStyle) -> Self {
    self.style = style;
    self
  }

  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }
}

#[async_trait]
impl<L: FaceModelLoader, S: RoastService> Task<L, S> for PackRoastTask {
  async fn run_task(
    self,
    pipeline: &Pipeline<L, S>,
    files: Vec<UploadedImage>,
  ) -> anyhow::Result<TaskReport> {
    info!("开始卡包吐槽任务: {}", self.pack.title);
    let now = Instant::now();
    let mut rng = match self.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };

    let mode = {
      let mut session = pipeline.session.lock().await;
      session.set_style(self.style);
      let title = self.pack.title.clone();
      if session.select_pack(self.pack, &mut rng).is_none() {
        bail!("卡包 {} 没有可用的问题", title);
      }
      for _ in 0..self.rerolls {
        session.reroll_prompt(&mut rng);
      }
      if let Some(prompt) = session.prompt() {
        info!("当前问题: {}", prompt.text());
      }
      if session.required_images() > 1 {
        BatchMode::Multi
      } else {
        BatchMode::Single
      }
    };

    let mut notices = Vec::new();
    let batch = pipeline.validate(files, mode, &mut notices).await?;
    pipeline.session.lock().await.accept_batch(&batch);

    let report = pipeline.generate_and_deliver(notices).await?;
    info!("任务完成，耗时: {:.2?}", now.elapsed());
    Ok(report)
  }
}
