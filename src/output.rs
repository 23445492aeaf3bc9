// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/output.rs - 导出定义
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

use std::{io::Cursor, sync::Arc, time::Instant};

use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compose::{Color, Element, VisualNode};

pub mod draw;
mod share;

pub use self::draw::{Draw, EXPORT_SCALE};
pub use self::share::{
  DirectoryRecord, LocalSave, NativeShare, SHARE_FAILED_NOTICE, SHARE_UNSUPPORTED_NOTICE,
  SaveImageFile, ShareOutcome, ShareTarget,
};

pub const EXPORT_FILENAME: &str = "roastmyface.png";
pub const EXPORT_MIME: &str = "image/png";

#[derive(Error, Debug)]
pub enum ExportError {
  #[error("nothing to export")]
  EmptyComposition,
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("分享失败: {0}")]
  Share(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 导出的栅格图片，按需生成，不跨导出保留
#[derive(Debug, Clone)]
pub struct ExportArtifact {
  bytes: Vec<u8>,
  mime: &'static str,
  filename: &'static str,
  width: u32,
  height: u32,
}

impl ExportArtifact {
  pub fn png(bytes: Vec<u8>, width: u32, height: u32) -> Self {
    Self {
      bytes,
      mime: EXPORT_MIME,
      filename: EXPORT_FILENAME,
      width,
      height,
    }
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.bytes
  }

  pub fn mime(&self) -> &str {
    self.mime
  }

  pub fn filename(&self) -> &str {
    self.filename
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
  pub visited: usize,
  pub backgrounds: usize,
  pub foregrounds: usize,
}

impl SanitizeReport {
  pub fn replaced(&self) -> usize {
    self.backgrounds + self.foregrounds
  }
}

/// 遍历组合树，把栅格化器无法表示的颜色替换为安全值：
/// 背景改为不透明白色，前景改为不透明黑色。
pub fn sanitize<N: VisualNode>(root: &mut N) -> SanitizeReport {
  let mut report = SanitizeReport::default();
  sanitize_node(root, &mut report);
  report
}

fn sanitize_node<N: VisualNode>(node: &mut N, report: &mut SanitizeReport) {
  report.visited += 1;
  let style = node.style_mut();
  if let Some(background) = &mut style.background
    && !background.is_supported()
  {
    debug!("替换背景色 {:?}", background);
    *background = Color::WHITE;
    report.backgrounds += 1;
  }
  if let Some(foreground) = &mut style.foreground
    && !foreground.is_supported()
  {
    debug!("替换前景色 {:?}", foreground);
    *foreground = Color::BLACK;
    report.foregrounds += 1;
  }

  for child in node.children_mut() {
    sanitize_node(child, report);
  }
}

/// 导出器：清理颜色、2 倍栅格化、编码为 PNG
#[derive(Default)]
pub struct Exporter {
  draw: Draw,
}

impl Exporter {
  pub fn new(draw: Draw) -> Self {
    Self { draw }
  }

  pub fn export(&self, root: &mut Element) -> Result<ExportArtifact, ExportError> {
    if !root.is_renderable() {
      warn!("组合树中没有可绘制的内容");
      return Err(ExportError::EmptyComposition);
    }

    let now = Instant::now();
    let report = sanitize(root);
    if report.replaced() > 0 {
      info!(
        "颜色清理: 共 {} 个元素, 替换 {} 个背景色, {} 个前景色",
        report.visited, report.backgrounds, report.foregrounds
      );
    }

    let canvas = self.draw.render(root);
    let (width, height) = canvas.dimensions();
    // 底板不透明，去掉 alpha 通道
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();

    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Png)?;
    info!(
      "导出完成: {}x{}, {} 字节, 耗时: {:.2?}",
      width,
      height,
      buffer.get_ref().len(),
      now.elapsed()
    );

    Ok(ExportArtifact::png(buffer.into_inner(), width, height))
  }

  /// 在阻塞线程池中导出，不占用异步调度线程
  pub async fn export_owned(
    self: Arc<Self>,
    mut root: Element,
  ) -> Result<ExportArtifact, ExportError> {
    tokio::task::spawn_blocking(move || self.export(&mut root))
      .await
      .map_err(std::io::Error::other)?
  }
}
