// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input/tensor_file.rs - 从 JSON 文件读取推理输出
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::TensorFrame, tensor::TensorSet};

#[derive(Error, Debug)]
pub enum TensorFileError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("I/O 错误 ({path}): {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("JSON 解析错误 ({path}): {source}")]
  JsonError {
    path: PathBuf,
    source: serde_json::Error,
  },
}

/// 单帧转储文件格式
///
/// ```json
/// { "image": "frame.png", "tensors": { "scores": { "shape": [1, 896, 1], "data": [...] } } }
/// ```
///
/// `image` 可省略，相对路径以 JSON 文件所在目录为基准。
#[derive(Deserialize)]
struct FrameDump {
  #[serde(default)]
  image: Option<PathBuf>,
  tensors: TensorSet,
}

fn check_scheme(url: &Url, expected: &'static str) -> Result<(), TensorFileError> {
  if url.scheme() != expected {
    error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", expected, url.scheme());
    return Err(TensorFileError::SchemeMismatch {
      expected,
      actual: url.scheme().to_string(),
    });
  }
  Ok(())
}

/// 读取并解析一个转储文件
pub fn load_frame(path: &Path, index: usize) -> Result<TensorFrame, TensorFileError> {
  let text = std::fs::read_to_string(path).map_err(|source| TensorFileError::IoError {
    path: path.to_path_buf(),
    source,
  })?;
  let dump: FrameDump = serde_json::from_str(&text).map_err(|source| TensorFileError::JsonError {
    path: path.to_path_buf(),
    source,
  })?;

  let background = dump.image.map(|image| match path.parent() {
    Some(parent) if image.is_relative() => parent.join(image),
    _ => image,
  });
  debug!("读取第 {} 帧: {} ({} 个张量)", index, path.display(), dump.tensors.len());

  Ok(TensorFrame {
    index,
    tensors: dump.tensors,
    background,
  })
}

/// `tensor:` 单个转储文件，只产生一帧
pub struct TensorFileInput {
  frame: Option<TensorFrame>,
}

impl FromUrlWithScheme for TensorFileInput {
  const SCHEME: &'static str = "tensor";
}

impl FromUrl for TensorFileInput {
  type Error = TensorFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let frame = load_frame(Path::new(url.path()), 0)?;
    Ok(TensorFileInput { frame: Some(frame) })
  }
}

impl Iterator for TensorFileInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// `tensordir:` 目录下所有 `.json` 转储，按文件名排序逐帧读取
///
/// 解析失败的文件记录错误后跳过。
pub struct TensorDirInput {
  files: std::vec::IntoIter<PathBuf>,
  index: usize,
}

impl FromUrlWithScheme for TensorDirInput {
  const SCHEME: &'static str = "tensordir";
}

impl FromUrl for TensorDirInput {
  type Error = TensorFileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;
    let directory = PathBuf::from(url.path());
    let io_error = |source| TensorFileError::IoError {
      path: directory.clone(),
      source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&directory).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 下共有 {} 个转储文件", directory.display(), files.len());

    Ok(TensorDirInput {
      files: files.into_iter(),
      index: 0,
    })
  }
}

impl Iterator for TensorDirInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match load_frame(&path, self.index) {
        Ok(frame) => {
          self.index += 1;
          return Some(frame);
        }
        Err(e) => error!("跳过无法读取的转储: {}", e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("guanlan-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  const DUMP: &str = r#"{
    "image": "frame.png",
    "tensors": {
      "scores": { "shape": [2, 1], "data": [0.5, 0.25] }
    }
  }"#;

  #[test]
  fn single_file() {
    let dir = scratch_dir("single");
    let path = dir.join("a.json");
    std::fs::write(&path, DUMP).unwrap();

    let url = Url::parse(&format!("tensor://{}", path.display())).unwrap();
    let mut input = TensorFileInput::from_url(&url).unwrap();

    let frame = input.next().unwrap();
    assert_eq!(frame.index, 0);
    assert_eq!(frame.tensors.get("scores").unwrap().data(), &[0.5, 0.25]);
    assert_eq!(frame.background(), Some(dir.join("frame.png").as_path()));
    assert!(input.next().is_none());
  }

  #[test]
  fn directory_is_sorted_and_skips_bad_files() {
    let dir = scratch_dir("dir");
    std::fs::write(dir.join("002.json"), DUMP).unwrap();
    std::fs::write(dir.join("001.json"), r#"{ "tensors": {} }"#).unwrap();
    std::fs::write(dir.join("003.json"), "not json").unwrap();
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let url = Url::parse(&format!("tensordir://{}", dir.display())).unwrap();
    let frames: Vec<_> = TensorDirInput::from_url(&url).unwrap().collect();

    assert_eq!(frames.len(), 2);
    assert!(frames[0].tensors.is_empty());
    assert!(frames[0].background.is_none());
    assert_eq!(frames[1].index, 1);
    assert_eq!(frames[1].tensors.len(), 1);
  }

  #[test]
  fn bad_shape_is_rejected() {
    let dir = scratch_dir("shape");
    let path = dir.join("bad.json");
    std::fs::write(&path, r#"{ "tensors": { "x": { "shape": [3], "data": [1.0] } } }"#).unwrap();

    assert!(matches!(
      load_frame(&path, 0),
      Err(TensorFileError::JsonError { .. })
    ));
  }

  #[test]
  fn wrong_scheme() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      TensorFileInput::from_url(&url),
      Err(TensorFileError::SchemeMismatch { expected: "tensor", .. })
    ));
  }
}
