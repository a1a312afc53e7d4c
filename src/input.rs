// 该文件是 Guanlan （观澜） 项目的一部分。
// src/input.rs - 推理输出张量的输入源
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

use thiserror::Error;
use tracing::error;

use crate::{FromUrl, FromUrlWithScheme, tensor::TensorSet};

/// 后处理管线的输入: 一帧推理得到的全部命名张量
pub trait AsTensorSet {
  fn as_tensor_set(&self) -> &TensorSet;
}

impl AsTensorSet for TensorSet {
  fn as_tensor_set(&self) -> &TensorSet {
    self
  }
}

/// 一帧输入，附带可选的原始图像用于可视化
#[derive(Debug, Clone)]
pub struct TensorFrame {
  pub index: usize,
  pub tensors: TensorSet,
  pub background: Option<PathBuf>,
}

impl TensorFrame {
  pub fn new(index: usize, tensors: TensorSet) -> Self {
    Self {
      index,
      tensors,
      background: None,
    }
  }

  pub fn background(&self) -> Option<&Path> {
    self.background.as_deref()
  }
}

impl AsTensorSet for TensorFrame {
  fn as_tensor_set(&self) -> &TensorSet {
    &self.tensors
  }
}

mod tensor_file;
pub use self::tensor_file::{TensorDirInput, TensorFileError, TensorFileInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("张量文件输入错误: {0}")]
  TensorFileError(#[from] TensorFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  TensorFile(TensorFileInput),
  TensorDir(TensorDirInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      s if s == TensorFileInput::SCHEME => Ok(InputWrapper::TensorFile(TensorFileInput::from_url(url)?)),
      s if s == TensorDirInput::SCHEME => Ok(InputWrapper::TensorDir(TensorDirInput::from_url(url)?)),
      other => {
        error!("不支持的输入方案: {}", other);
        Err(InputError::SchemeMismatch(other.to_string()))
      }
    }
  }
}

impl Iterator for InputWrapper {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::TensorFile(input) => input.next(),
      InputWrapper::TensorDir(input) => input.next(),
    }
  }
}
