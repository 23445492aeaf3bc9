// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use args::{Args, Command};
use roastmyface::{
  FromUrl,
  catalog::{Catalog, CatalogSourceWrapper, load_catalog},
  detector::{DetectorGateway, DetectorWrapper},
  output::{EXPORT_FILENAME, Exporter, LocalSave, SaveImageFile, ShareOutcome, ShareTarget},
  roast::{HttpRoastService, RoastOrchestrator, RoastResult},
  task::{PackRoastTask, Pipeline, SingleRoastTask, Task, TaskReport},
  upload::UploadedImage,
  validate::ImageValidator,
};

async fn build_pipeline(args: &Args) -> Result<Pipeline<DetectorWrapper, HttpRoastService>> {
  let detector = args
    .detector
    .as_ref()
    .context("需要通过 --detector 指定人脸检测模型")?;
  let gateway = Arc::new(DetectorGateway::new(DetectorWrapper::from_url(detector)?));
  let validator = ImageValidator::new(gateway).with_concurrency(args.concurrency);

  let service = HttpRoastService::from_url(&args.service)?;
  let local = match &args.output {
    Some(url) => LocalSave::from_url(url)?,
    None => LocalSave::File(SaveImageFile::new(EXPORT_FILENAME)),
  };
  let share = ShareTarget::detect(args.share_command.as_deref(), local);

  let pipeline = Pipeline::new(
    validator,
    RoastOrchestrator::new(service),
    Exporter::default(),
    share,
  );

  let cancel = pipeline.validator().cancel_handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，取消正在进行的校验...");
    cancel.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(10));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  pipeline.initialize().await;
  Ok(pipeline)
}

async fn read_images(paths: &[std::path::PathBuf]) -> Result<Vec<UploadedImage>> {
  let mut files = Vec::with_capacity(paths.len());
  for path in paths {
    let file = UploadedImage::from_path(path)
      .await
      .with_context(|| format!("无法读取文件: {}", path.display()))?;
    files.push(file);
  }
  Ok(files)
}

fn list_packs(catalog: &Catalog) {
  for pack in catalog.packs() {
    println!("{} ({})", pack.title, pack.id);
    for item in pack.questions() {
      println!(
        "  - [{} 张] {}",
        item.required_image_count().unwrap_or(1),
        item.text()
      );
    }
  }
}

fn print_report(report: &TaskReport) {
  for notice in &report.notices {
    println!("! {}", notice);
  }
  if let Some(prompt) = &report.prompt {
    println!("问题: {}", prompt);
  }
  match &report.result {
    RoastResult::Flat(roasts) => {
      for roast in roasts {
        println!("- {}", roast);
      }
    }
    RoastResult::PerImage(roasts) => {
      for roast in roasts {
        println!("- [#{}] {}", roast.image_index + 1, roast.roast);
      }
    }
  }
  match &report.delivery {
    ShareOutcome::Shared => println!("已分享"),
    ShareOutcome::Saved { path, notice } => {
      if let Some(notice) = notice {
        println!("! {}", notice);
      }
      println!("已保存: {}", path.display());
    }
  }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("吐槽服务: {}", args.service);
  if let Some(detector) = &args.detector {
    info!("人脸检测模型: {}", detector);
  }

  let source = match &args.catalog {
    Some(url) => CatalogSourceWrapper::from_url(url)
      .inspect_err(|e| warn!("卡包目录地址无效: {}，使用内置卡包", e))
      .ok(),
    None => None,
  };
  let catalog = load_catalog(source.as_ref()).await;

  match &args.command {
    Command::Packs => list_packs(&catalog),
    Command::Roast { style, image } => {
      let pipeline = build_pipeline(&args).await?;
      let files = read_images(std::slice::from_ref(image)).await?;
      let report = SingleRoastTask::new(*style).run_task(&pipeline, files).await?;
      print_report(&report);
    }
    Command::Pack {
      pack,
      reroll,
      style,
      images,
    } => {
      let selected = catalog
        .find(pack)
        .cloned()
        .with_context(|| format!("找不到卡包 '{}'", pack))?;
      let pipeline = build_pipeline(&args).await?;
      let files = read_images(images).await?;
      let report = PackRoastTask::new(selected)
        .with_rerolls(*reroll)
        .with_style(*style)
        .run_task(&pipeline, files)
        .await?;
      print_report(&report);
    }
  }

  Ok(())
}
