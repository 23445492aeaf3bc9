// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/catalog.rs - 卡包目录
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

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, url_to_path};

const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
  Statement,
  Question,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptItem {
  Statement {
    text: String,
  },
  Question {
    text: String,
    #[serde(default = "default_required_pictures")]
    required_pictures: u32,
  },
}

fn default_required_pictures() -> u32 {
  1
}

impl PromptItem {
  pub fn question(text: impl Into<String>, required_pictures: u32) -> Self {
    PromptItem::Question {
      text: text.into(),
      required_pictures,
    }
  }

  pub fn statement(text: impl Into<String>) -> Self {
    PromptItem::Statement { text: text.into() }
  }

  pub fn kind(&self) -> PromptKind {
    match self {
      PromptItem::Statement { .. } => PromptKind::Statement,
      PromptItem::Question { .. } => PromptKind::Question,
    }
  }

  pub fn text(&self) -> &str {
    match self {
      PromptItem::Statement { text } | PromptItem::Question { text, .. } => text,
    }
  }

  /// 仅问题项有所需图片数
  pub fn required_image_count(&self) -> Option<usize> {
    match self {
      PromptItem::Statement { .. } => None,
      PromptItem::Question {
        required_pictures, ..
      } => Some(*required_pictures as usize),
    }
  }

  pub fn is_question(&self) -> bool {
    self.kind() == PromptKind::Question
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
  pub id: String,
  pub title: String,
  pub items: Vec<PromptItem>,
}

impl Pack {
  pub fn questions(&self) -> impl Iterator<Item = &PromptItem> {
    self.items.iter().filter(|item| item.is_question())
  }

  /// 至少有一个问题项时才能用于多图吐槽
  pub fn supports_multi_image(&self) -> bool {
    self.questions().next().is_some()
  }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
  packs: Vec<Pack>,
}

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("HTTP status {0}")]
  Status(u16),
  #[error("JSON error: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("invalid catalog: {0}")]
  Invalid(String),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOrigin {
  External(String),
  Embedded,
}

#[derive(Debug, Clone)]
pub struct Catalog {
  packs: Vec<Pack>,
  origin: CatalogOrigin,
}

impl Catalog {
  /// 解析并检查 `{ packs: [...] }` 文档
  pub fn parse(json: &str) -> Result<Vec<Pack>, CatalogError> {
    let document: CatalogDocument = serde_json::from_str(json)?;
    if document.packs.is_empty() {
      return Err(CatalogError::Invalid("catalog has no packs".to_string()));
    }
    for pack in &document.packs {
      if pack.id.trim().is_empty() {
        return Err(CatalogError::Invalid(format!(
          "pack '{}' has an empty id",
          pack.title
        )));
      }
      for item in &pack.items {
        if item.required_image_count() == Some(0) {
          return Err(CatalogError::Invalid(format!(
            "question '{}' in pack '{}' requires zero pictures",
            item.text(),
            pack.id
          )));
        }
      }
    }
    Ok(document.packs)
  }

  pub fn embedded() -> Self {
    Self {
      packs: default_packs(),
      origin: CatalogOrigin::Embedded,
    }
  }

  pub fn packs(&self) -> &[Pack] {
    &self.packs
  }

  pub fn origin(&self) -> &CatalogOrigin {
    &self.origin
  }

  pub fn find(&self, id: &str) -> Option<&Pack> {
    self
      .packs
      .iter()
      .find(|pack| pack.id == id || pack.title.eq_ignore_ascii_case(id))
  }
}

/// 先尝试外部来源，任何失败都回退到内置目录
pub async fn load_catalog<S: CatalogSource + ?Sized>(source: Option<&S>) -> Catalog {
  let Some(source) = source else {
    info!("未配置外部卡包目录，使用内置目录");
    return Catalog::embedded();
  };

  let loaded = match source.fetch().await {
    Ok(json) => Catalog::parse(&json),
    Err(e) => Err(e),
  };

  match loaded {
    Ok(packs) => {
      info!("从 {} 加载了 {} 个卡包", source.describe(), packs.len());
      Catalog {
        packs,
        origin: CatalogOrigin::External(source.describe()),
      }
    }
    Err(e) => {
      warn!("加载卡包目录 {} 失败，回退到内置目录: {}", source.describe(), e);
      Catalog::embedded()
    }
  }
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
  fn describe(&self) -> String;
  async fn fetch(&self) -> Result<String, CatalogError>;
}

pub struct FileCatalogSource {
  path: PathBuf,
}

impl FileCatalogSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

#[async_trait]
impl CatalogSource for FileCatalogSource {
  fn describe(&self) -> String {
    self.path.display().to_string()
  }

  async fn fetch(&self) -> Result<String, CatalogError> {
    Ok(tokio::fs::read_to_string(&self.path).await?)
  }
}

pub struct HttpCatalogSource {
  client: reqwest::Client,
  url: Url,
}

impl HttpCatalogSource {
  pub fn new(url: Url) -> Result<Self, CatalogError> {
    let client = reqwest::Client::builder()
      .timeout(HTTP_FETCH_TIMEOUT)
      .build()?;
    Ok(Self { client, url })
  }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
  fn describe(&self) -> String {
    self.url.to_string()
  }

  async fn fetch(&self) -> Result<String, CatalogError> {
    let response = self.client.get(self.url.clone()).send().await?;
    if !response.status().is_success() {
      return Err(CatalogError::Status(response.status().as_u16()));
    }
    Ok(response.text().await?)
  }
}

pub enum CatalogSourceWrapper {
  File(FileCatalogSource),
  Http(HttpCatalogSource),
}

impl FromUrl for CatalogSourceWrapper {
  type Error = CatalogError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "file" => Ok(CatalogSourceWrapper::File(FileCatalogSource::new(
        url_to_path(url),
      ))),
      "http" | "https" => Ok(CatalogSourceWrapper::Http(HttpCatalogSource::new(
        url.clone(),
      )?)),
      other => Err(CatalogError::SchemeMismatch(other.to_string())),
    }
  }
}

#[async_trait]
impl CatalogSource for CatalogSourceWrapper {
  fn describe(&self) -> String {
    match self {
      CatalogSourceWrapper::File(source) => source.describe(),
      CatalogSourceWrapper::Http(source) => source.describe(),
    }
  }

  async fn fetch(&self) -> Result<String, CatalogError> {
    match self {
      CatalogSourceWrapper::File(source) => source.fetch().await,
      CatalogSourceWrapper::Http(source) => source.fetch().await,
    }
  }
}

fn default_packs() -> Vec<Pack> {
  vec![
    Pack {
      id: "politician".to_string(),
      title: "Politician Pack".to_string(),
      items: vec![
        PromptItem::statement("Every campaign poster lies. These faces are no exception."),
        PromptItem::question("Who would lose an election to a potato?", 2),
        PromptItem::question("Rank these candidates from most to least trustworthy", 3),
        PromptItem::question("Who gives the longest speech and says nothing?", 2),
      ],
    },
    Pack {
      id: "celebrity".to_string(),
      title: "Celebrity Pack".to_string(),
      items: vec![
        PromptItem::statement("Fame is temporary. These selfies are forever."),
        PromptItem::question("Who looks most like a discount celebrity lookalike?", 2),
        PromptItem::question("Rank these from A-list to no-list", 3),
        PromptItem::question("Who would get cancelled first?", 2),
      ],
    },
    Pack {
      id: "meme".to_string(),
      title: "Meme Pack".to_string(),
      items: vec![
        PromptItem::question("Which face is the 'this is fine' dog?", 2),
        PromptItem::question("Who is the main character and who is the NPC?", 2),
        PromptItem::question("Assign each face a meme template", 2),
      ],
    },
  ]
}
