// 该文件是 RoastMyFace （烤脸） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

use roastmyface::{roast::RoastStyle, validate::DEFAULT_CONCURRENCY};

/// RoastMyFace 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 人脸检测模型（roast 与 pack 必需）
  /// - SeetaFace: seeta:///path/to/seeta_fd_frontal_v1.0.bin?min_face_size=20
  #[arg(long, value_name = "MODEL")]
  pub detector: Option<Url>,

  /// 吐槽服务地址
  #[arg(long, value_name = "URL", default_value = "http://localhost:5000/")]
  pub service: Url,

  /// 卡包目录（file:// 或 https://），不指定时使用内置卡包
  #[arg(long, value_name = "URL")]
  pub catalog: Option<Url>,

  /// 导出路径
  /// - 单个文件: image:///path/to/roastmyface.png
  /// - 按日期归档: folder:///path/to/dir
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 系统分享程序，图片路径作为最后一个参数传入
  #[arg(long, value_name = "COMMAND")]
  pub share_command: Option<String>,

  /// 同时检测的图像数量
  #[arg(long, value_name = "N", default_value_t = DEFAULT_CONCURRENCY)]
  pub concurrency: usize,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 单张照片，按风格吐槽
  Roast {
    /// default | pidgin | patois
    #[arg(long, default_value = "default")]
    style: RoastStyle,
    /// 照片路径
    image: PathBuf,
  },
  /// 多张照片，按卡包问题吐槽
  Pack {
    /// 卡包 id 或标题
    #[arg(long)]
    pack: String,
    /// 换题次数
    #[arg(long, default_value_t = 0)]
    reroll: usize,
    #[arg(long, default_value = "default")]
    style: RoastStyle,
    /// 照片路径
    #[arg(required = true)]
    images: Vec<PathBuf>,
  },
  /// 列出卡包与问题
  Packs,
}
