// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/output/share.rs - 导出图片的分享与本地保存
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
  io::{ErrorKind, Write},
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{Datelike, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{ExportArtifact, ExportError},
  url_to_path,
};

pub const SHARE_UNSUPPORTED_NOTICE: &str =
  "Sharing isn't supported on this device, so the roast was saved instead.";
pub const SHARE_FAILED_NOTICE: &str = "Sharing failed, so the roast was saved instead.";

/// 保存到一个固定文件，`image:///path/to/roast.png`
pub struct SaveImageFile {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveImageFile {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFile {
  type Error = ExportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ExportError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    Ok(SaveImageFile {
      path: url_to_path(uri),
    })
  }
}

impl SaveImageFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 保存到按日期分层的目录，`folder:///path/to/dir`，文件名互不重复
pub struct DirectoryRecord {
  directory: PathBuf,
  counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecord {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecord {
  type Error = ExportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ExportError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    Ok(DirectoryRecord::new(url_to_path(uri)))
  }
}

impl DirectoryRecord {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      counter: AtomicU16::new(0),
    }
  }

  fn next_path(&self) -> PathBuf {
    let id = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
    let now = Utc::now();
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(format!("{}-{:04X}.png", now.format("%H-%M-%S"), id))
  }
}

/// 本地保存，按 URL 方案选择
pub enum LocalSave {
  File(SaveImageFile),
  Directory(DirectoryRecord),
}

impl FromUrl for LocalSave {
  type Error = ExportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SaveImageFile::SCHEME => Ok(LocalSave::File(SaveImageFile::from_url(url)?)),
      DirectoryRecord::SCHEME => Ok(LocalSave::Directory(DirectoryRecord::from_url(url)?)),
      other => Err(ExportError::SchemeMismatch(other.to_string())),
    }
  }
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent).await?;
  }
  Ok(())
}

impl DirectoryRecord {
  /// 只创建新文件；文件名已被占用（例如另一个进程同一秒写入）时换下一个编号
  async fn save(&self, artifact: &ExportArtifact) -> Result<PathBuf, ExportError> {
    for _ in 0..=u16::MAX {
      let path = self.next_path();
      ensure_parent(&path).await?;
      match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
      {
        Ok(mut file) => {
          file.write_all(artifact.bytes()).await?;
          file.flush().await?;
          return Ok(path);
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
          debug!("文件已存在，换一个编号: {}", path.display());
        }
        Err(e) => return Err(e.into()),
      }
    }
    Err(ExportError::Io(std::io::Error::new(
      ErrorKind::AlreadyExists,
      format!("{} 中没有可用的文件名", self.directory.display()),
    )))
  }
}

impl LocalSave {
  pub async fn save(&self, artifact: &ExportArtifact) -> Result<PathBuf, ExportError> {
    let path = match self {
      LocalSave::File(file) => {
        ensure_parent(file.path()).await?;
        tokio::fs::write(file.path(), artifact.bytes()).await?;
        file.path().to_path_buf()
      }
      LocalSave::Directory(directory) => directory.save(artifact).await?,
    };
    info!("保存图像到文件: {}", path.display());
    Ok(path)
  }
}

/// 系统分享能力：一个接收图片路径作为最后一个参数的外部程序
#[derive(Debug, Clone)]
pub struct NativeShare {
  program: PathBuf,
  args: Vec<String>,
}

impl NativeShare {
  /// 探测分享命令，按 shell 规则拆分引号。
  /// 命令为空、引号不配对或程序找不到时视为没有分享能力。
  pub fn detect(command: &str) -> Option<Self> {
    let mut parts = shell_words::split(command)
      .inspect_err(|e| warn!("无法解析分享命令 '{}': {}", command, e))
      .ok()?
      .into_iter();
    let program = resolve_program(&parts.next()?)?;
    Some(Self {
      program,
      args: parts.collect(),
    })
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  /// 图片写入临时文件交给分享程序，程序退出后临时文件随之删除
  pub async fn share(&self, artifact: &ExportArtifact) -> Result<(), ExportError> {
    let mut file = tempfile::Builder::new()
      .prefix("roastmyface-")
      .suffix(".png")
      .tempfile()?;
    file.write_all(artifact.bytes())?;
    file.flush()?;
    let path = file.path();

    let status = tokio::process::Command::new(&self.program)
      .args(&self.args)
      .arg(path)
      .status()
      .await?;
    if !status.success() {
      return Err(ExportError::Share(format!(
        "{} 退出状态: {}",
        self.program.display(),
        status
      )));
    }
    info!("已通过 {} 分享 {}", self.program.display(), path.display());
    Ok(())
  }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
  let candidate = Path::new(program);
  if candidate.components().count() > 1 {
    return candidate.is_file().then(|| candidate.to_path_buf());
  }
  let paths = std::env::var_os("PATH")?;
  std::env::split_paths(&paths)
    .map(|dir| dir.join(program))
    .find(|path| path.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
  Shared,
  Saved {
    path: PathBuf,
    notice: Option<String>,
  },
}

/// 分享目标，在调用时根据能力探测结果选择，而不是固定实现
pub enum ShareTarget {
  NativeShare {
    native: NativeShare,
    fallback: LocalSave,
  },
  LocalSave(LocalSave),
}

impl ShareTarget {
  pub fn detect(share_command: Option<&str>, fallback: LocalSave) -> Self {
    match share_command.and_then(NativeShare::detect) {
      Some(native) => {
        info!("检测到系统分享程序: {}", native.program().display());
        ShareTarget::NativeShare { native, fallback }
      }
      None => {
        if let Some(command) = share_command {
          warn!("找不到分享程序 '{}'，只能保存到本地", command);
        }
        ShareTarget::LocalSave(fallback)
      }
    }
  }

  pub fn has_native(&self) -> bool {
    matches!(self, ShareTarget::NativeShare { .. })
  }

  /// 优先系统分享，失败则保存到本地；没有分享能力时总是本地保存并附带提示
  pub async fn deliver(&self, artifact: &ExportArtifact) -> Result<ShareOutcome, ExportError> {
    match self {
      ShareTarget::NativeShare { native, fallback } => match native.share(artifact).await {
        Ok(()) => Ok(ShareOutcome::Shared),
        Err(e) => {
          error!("系统分享失败: {}，改为本地保存", e);
          let path = fallback.save(artifact).await?;
          Ok(ShareOutcome::Saved {
            path,
            notice: Some(SHARE_FAILED_NOTICE.to_string()),
          })
        }
      },
      ShareTarget::LocalSave(local) => {
        let path = local.save(artifact).await?;
        Ok(ShareOutcome::Saved {
          path,
          notice: Some(SHARE_UNSUPPORTED_NOTICE.to_string()),
        })
      }
    }
  }
}
