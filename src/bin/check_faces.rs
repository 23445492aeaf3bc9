// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/bin/check_faces.rs - 人脸检测校验测试代码
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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use roastmyface::{
  FromUrl,
  detector::{DetectorGateway, DetectorWrapper},
  upload::UploadedImage,
  validate::{BatchMode, DEFAULT_CONCURRENCY, ImageValidator, ValidationOutcome},
};

/// 只做上传校验，不调用吐槽服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 按多图流程校验（只有一张通过时整批作废）
  #[arg(long)]
  pub multi: bool,
  /// 同时检测的图像数量
  #[arg(long, value_name = "N", default_value_t = DEFAULT_CONCURRENCY)]
  pub concurrency: usize,
  /// 照片路径
  #[arg(required = true)]
  pub images: Vec<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.detector);

  let gateway = Arc::new(DetectorGateway::new(DetectorWrapper::from_url(&args.detector)?));
  let status = gateway.initialize().await;
  info!("检测模型状态: {:?}", status);

  let mut files = Vec::with_capacity(args.images.len());
  for path in &args.images {
    files.push(
      UploadedImage::from_path(path)
        .await
        .with_context(|| format!("无法读取文件: {}", path.display()))?,
    );
  }

  let mode = if args.multi {
    BatchMode::Multi
  } else {
    BatchMode::Single
  };
  let validator = ImageValidator::new(gateway).with_concurrency(args.concurrency);

  let now = std::time::Instant::now();
  let batch = validator.validate_batch(files, mode).await?;
  info!("校验完成，耗时: {:.2?}", now.elapsed());

  for outcome in batch.outcomes() {
    match outcome {
      ValidationOutcome::Accepted(image) => println!("ok    {}", image.filename()),
      ValidationOutcome::Rejected(image, reason) => {
        println!("skip  {} ({})", image.filename(), reason)
      }
    }
  }
  println!("{}/{} 张图片可用", batch.accepted_count(), batch.len());

  Ok(())
}
