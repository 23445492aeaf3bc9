// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/upload.rs - 用户上传的图像
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

use std::{path::Path, sync::Arc};

use image::ImageFormat;
use tracing::debug;

const FALLBACK_MIME: &str = "application/octet-stream";

/// 一张用户选择的图片：原始字节、文件名与 MIME 类型。
///
/// 创建后不可变。负载通过 `Arc` 共享，校验器、请求体和卡片合成可以同时持有同一份数据而不复制。
#[derive(Debug, Clone)]
pub struct UploadedImage {
  data: Arc<[u8]>,
  filename: String,
  mime: String,
}

impl UploadedImage {
  pub fn new(data: impl Into<Arc<[u8]>>, filename: impl Into<String>) -> Self {
    let data = data.into();
    let filename = filename.into();
    let mime = sniff_mime(&data, &filename);
    debug!("新建上传图像: {} ({}, {} 字节)", filename, mime, data.len());
    Self {
      data,
      filename,
      mime,
    }
  }

  pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
    self.mime = mime.into();
    self
  }

  pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Ok(Self::new(data, filename))
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn shared_data(&self) -> Arc<[u8]> {
    Arc::clone(&self.data)
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn mime(&self) -> &str {
    &self.mime
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 两个句柄是否指向同一份负载
  pub fn same_payload(&self, other: &UploadedImage) -> bool {
    Arc::ptr_eq(&self.data, &other.data)
  }
}

fn sniff_mime(data: &[u8], filename: &str) -> String {
  image::guess_format(data)
    .ok()
    .or_else(|| ImageFormat::from_path(filename).ok())
    .map(|format| format.to_mime_type().to_string())
    .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

  #[test]
  fn mime_comes_from_magic_bytes_first() {
    let image = UploadedImage::new(PNG_MAGIC.to_vec(), "selfie.jpg");
    assert_eq!(image.mime(), "image/png");
  }

  #[test]
  fn mime_falls_back_to_extension_then_octet_stream() {
    let jpeg = UploadedImage::new(b"not really".to_vec(), "selfie.jpeg");
    assert_eq!(jpeg.mime(), "image/jpeg");

    let unknown = UploadedImage::new(b"???".to_vec(), "notes");
    assert_eq!(unknown.mime(), FALLBACK_MIME);
  }

  #[test]
  fn clones_share_the_payload() {
    let image = UploadedImage::new(vec![1u8, 2, 3], "a.png");
    let clone = image.clone();
    assert!(image.same_payload(&clone));
    assert_eq!(clone.len(), 3);
  }

  #[tokio::test]
  async fn reads_from_disk_with_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face one.png");
    std::fs::write(&path, PNG_MAGIC).unwrap();

    let image = UploadedImage::from_path(&path).await.unwrap();
    assert_eq!(image.filename(), "face one.png");
    assert_eq!(image.data(), PNG_MAGIC);
  }
}
