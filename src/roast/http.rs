// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/roast/http.rs - 基于 HTTP multipart 的吐槽服务
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

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  roast::{RoastError, RoastRequest, RoastService},
  upload::UploadedImage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const SINGLE_ENDPOINT: &str = "api/roast";
const PACK_ENDPOINT: &str = "api/roast/pack";

pub struct HttpRoastService {
  client: reqwest::Client,
  base: Url,
}

impl FromUrl for HttpRoastService {
  type Error = RoastError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "http" | "https" => {}
      other => {
        return Err(RoastError::Transport(format!(
          "期望服务地址为 http/https, 实际为 '{}'",
          other
        )));
      }
    }

    let client = reqwest::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| RoastError::Transport(e.to_string()))?;

    // 保证基础路径以 '/' 结尾，join 时不会吞掉最后一段
    let mut base = url.clone();
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    Ok(Self { client, base })
  }
}

impl HttpRoastService {
  pub fn base(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, request: &RoastRequest) -> Result<Url, RoastError> {
    let path = match request {
      RoastRequest::Single { .. } => SINGLE_ENDPOINT,
      RoastRequest::Pack { .. } => PACK_ENDPOINT,
    };
    self
      .base
      .join(path)
      .map_err(|e| RoastError::Transport(e.to_string()))
  }
}

fn image_part(image: &UploadedImage) -> Result<Part, RoastError> {
  Part::bytes(image.data().to_vec())
    .file_name(image.filename().to_string())
    .mime_str(image.mime())
    .map_err(|e| RoastError::Transport(e.to_string()))
}

fn build_form(request: &RoastRequest) -> Result<Form, RoastError> {
  let form = match request {
    RoastRequest::Single { image, style } => Form::new()
      .part("image", image_part(image)?)
      .text("style", style.as_str()),
    RoastRequest::Pack {
      images,
      prompt,
      pack_title,
      style,
    } => {
      let mut form = Form::new();
      for image in images {
        form = form.part("images", image_part(image)?);
      }
      form
        .text("prompt", prompt.clone())
        .text("packTitle", pack_title.clone())
        .text("style", style.as_str())
    }
  };
  Ok(form)
}

#[async_trait]
impl RoastService for HttpRoastService {
  async fn send(&self, request: &RoastRequest) -> Result<serde_json::Value, RoastError> {
    let url = self.endpoint(request)?;
    debug!("POST {}", url);

    let response = self
      .client
      .post(url)
      .multipart(build_form(request)?)
      .send()
      .await
      .map_err(|e| RoastError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response
        .text()
        .await
        .inspect_err(|e| debug!("读取错误响应体失败: {}", e))
        .unwrap_or_default();
      return Err(RoastError::Transport(format!("HTTP {}: {}", status, body)));
    }

    response
      .json::<serde_json::Value>()
      .await
      .map_err(|e| RoastError::InvalidResponse(e.to_string()))
  }
}
