// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/directory_record.rs - 按日期分目录记录检测结果
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, input::TensorFrame, model::DetectResult, output::Render,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[cfg(feature = "save_image_file")]
  #[error("保存图像错误: {0}")]
  ImageError(#[from] crate::output::SaveImageFileError),
}

#[derive(Serialize)]
struct Record<'a> {
  frame: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  image: Option<&'a Path>,
  #[serde(flatten)]
  result: &'a DetectResult,
}

/// `folder:` 输出，每帧写入 `目录/年/月/日/时-分-秒-序号.json`
///
/// - `always`: 没有检测结果的帧也记录
/// - `draw`: 同时保存叠加检测结果的 PNG（需要 `save_image_file` 特性）
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  always: bool,
  #[cfg(feature = "save_image_file")]
  draw: Option<crate::output::draw::Draw>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    #[cfg(feature = "save_image_file")]
    let draw = uri
      .query_pairs()
      .any(|(k, _)| k == "draw")
      .then(crate::output::draw::Draw::default);

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counter: AtomicU16::new(0),
      always,
      #[cfg(feature = "save_image_file")]
      draw,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 不含扩展名的记录路径，所在目录不存在时创建
  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<TensorFrame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    let record = Record {
      frame: frame.index,
      image: frame.background(),
      result,
    };
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;

    #[cfg(feature = "save_image_file")]
    {
      if let Some(draw) = &self.draw {
        let image = draw.draw_detection(frame, result);
        crate::output::save_image_file::save_image(&path.with_extension("png"), &image)?;
      }
    }

    debug!("记录第 {} 帧到 {}", frame.index, path.display());
    Ok(())
  }
}
