// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model.rs - 检测后处理模型
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

use serde::Serialize;
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::{Point2, Point3},
  input::AsTensorSet,
  tensor::TensorError,
};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 旋转后的感兴趣区域，供第二阶段网络裁剪使用
///
/// `corners` 的顺序固定为旋转前的左上、右上、右下、左下，渲染端按此顺序映射纹理坐标。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrientedRoi {
  pub center: Point2,
  pub size: Point2,
  pub corners: [Point2; 4],
}

/// 一个候选检测区域，坐标均为归一化图像坐标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedRegion {
  pub score: f32,
  pub topleft: Point2,
  pub btmright: Point2,
  pub keypoints: Vec<Point2>,
  pub rotation: f32,
  pub roi: Option<OrientedRoi>,
}

impl DetectedRegion {
  /// 由两个对角点构造，内部用 min/max 保证 `topleft <= btmright`
  pub fn from_corners(score: f32, a: Point2, b: Point2) -> Self {
    Self {
      score,
      topleft: Point2::new(a.x.min(b.x), a.y.min(b.y)),
      btmright: Point2::new(a.x.max(b.x), a.y.max(b.y)),
      keypoints: Vec::new(),
      rotation: 0.0,
      roi: None,
    }
  }

  pub fn width(&self) -> f32 {
    self.btmright.x - self.topleft.x
  }

  pub fn height(&self) -> f32 {
    self.btmright.y - self.topleft.y
  }

  pub fn center(&self) -> Point2 {
    Point2::new(
      (self.topleft.x + self.btmright.x) * 0.5,
      (self.topleft.y + self.btmright.y) * 0.5,
    )
  }
}

/// 三维长方体检测结果
///
/// `keypoints` 是投票得到的 2D 角点，`bbox2d` 是 3D 解算后重投影的角点，
/// 两者和 `bbox3d` 都使用与 alpha 系数矩阵相同的 0..7 顶点编号。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cuboid {
  pub belief: f32,
  pub center: Point2,
  pub keypoints: [Point2; 8],
  pub bbox2d: [Point2; 8],
  pub bbox3d: [Point3; 8],
  pub center3d: Point3,
}

/// 一帧的检测结果，按接受顺序排列，长度受各管线上限约束
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum DetectResult {
  Regions(Box<[DetectedRegion]>),
  Cuboids(Box<[Cuboid]>),
}

impl DetectResult {
  pub fn len(&self) -> usize {
    match self {
      DetectResult::Regions(items) => items.len(),
      DetectResult::Cuboids(items) => items.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn regions(&self) -> &[DetectedRegion] {
    match self {
      DetectResult::Regions(items) => items,
      DetectResult::Cuboids(_) => &[],
    }
  }

  pub fn cuboids(&self) -> &[Cuboid] {
    match self {
      DetectResult::Regions(_) => &[],
      DetectResult::Cuboids(items) => items,
    }
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("锚点数量不匹配: 锚点表 {anchors} 个, 张量 {name} 有 {actual} 项")]
  AnchorCountMismatch {
    name: String,
    anchors: usize,
    actual: usize,
  },
  #[error("张量 {name} 通道数不符: 期望 {expected}, 实际 {actual}")]
  ChannelMismatch {
    name: String,
    expected: usize,
    actual: usize,
  },
  #[error("张量 {0} 与 {1} 的网格尺寸不一致")]
  GridMismatch(String, String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {0} 的值无效: {1}")]
  InvalidParameter(&'static str, String),
}

impl PipelineError {
  pub(crate) fn channels(name: &str, expected: usize, actual: usize) -> Self {
    error!("张量 {} 通道数不符: 期望 {}, 实际 {}", name, expected, actual);
    PipelineError::ChannelMismatch {
      name: name.to_string(),
      expected,
      actual,
    }
  }

  pub(crate) fn grid(a: &str, b: &str) -> Self {
    error!("张量 {} 与 {} 的网格尺寸不一致", a, b);
    PipelineError::GridMismatch(a.to_string(), b.to_string())
  }
}

/// 检查 URL 方案，供各管线的 `FromUrl` 使用
pub(crate) fn check_scheme(url: &Url, scheme: &str) -> Result<(), PipelineError> {
  if url.scheme() != scheme {
    return Err(PipelineError::ModelPathError(format!(
      "模型路径必须使用 {} 方案",
      scheme
    )));
  }
  Ok(())
}

/// 读取查询参数，缺省时保持原值
pub(crate) fn query_or<T: std::str::FromStr>(
  url: &Url,
  key: &'static str,
  default: T,
) -> Result<T, PipelineError> {
  match crate::query_value::<T>(url, key) {
    None => Ok(default),
    Some(Ok(value)) => Ok(value),
    Some(Err(raw)) => {
      error!("参数 {} 的值无效: {}", key, raw);
      Err(PipelineError::InvalidParameter(key, raw))
    }
  }
}

pub mod anchor;
pub mod epnp;
pub mod grid;
pub mod nms;
pub mod objectron;
pub mod roi;
pub mod ssd;

mod blazeface;
mod blazepose;
mod dbface;
mod objectron3d;
mod textdet;

pub use self::blazeface::{BlazeFace, BlazeFaceBuilder};
pub use self::blazepose::{BlazePose, BlazePoseBuilder};
pub use self::dbface::{DbFace, DbFaceBuilder};
pub use self::objectron3d::{Objectron, ObjectronBuilder};
pub use self::textdet::{TextDet, TextDetBuilder};

/// 按 URL 方案选择的检测管线
pub enum Detection<Frame> {
  BlazeFace(BlazeFace<Frame>),
  BlazePose(BlazePose<Frame>),
  DbFace(DbFace<Frame>),
  TextDet(TextDet<Frame>),
  Objectron(Objectron<Frame>),
}

impl<Frame> FromUrl for Detection<Frame> {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      s if s == BlazeFaceBuilder::SCHEME => Ok(Detection::BlazeFace(
        BlazeFaceBuilder::from_url(url)?.build()?,
      )),
      s if s == BlazePoseBuilder::SCHEME => Ok(Detection::BlazePose(
        BlazePoseBuilder::from_url(url)?.build()?,
      )),
      s if s == DbFaceBuilder::SCHEME => {
        Ok(Detection::DbFace(DbFaceBuilder::from_url(url)?.build()?))
      }
      s if s == TextDetBuilder::SCHEME => {
        Ok(Detection::TextDet(TextDetBuilder::from_url(url)?.build()?))
      }
      s if s == ObjectronBuilder::SCHEME => Ok(Detection::Objectron(
        ObjectronBuilder::from_url(url)?.build()?,
      )),
      other => {
        error!("不支持的模型方案: {}", other);
        Err(PipelineError::ModelPathError(format!(
          "不支持的模型方案: {}",
          other
        )))
      }
    }
  }
}

impl<Frame: AsTensorSet> Model for Detection<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      Detection::BlazeFace(model) => model.infer(input),
      Detection::BlazePose(model) => model.infer(input),
      Detection::DbFace(model) => model.infer(input),
      Detection::TextDet(model) => model.infer(input),
      Detection::Objectron(model) => model.infer(input),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn from_corners_orders_components() {
    let region = DetectedRegion::from_corners(0.9, Point2::new(0.6, 0.1), Point2::new(0.2, 0.4));
    assert_eq!(region.topleft, Point2::new(0.2, 0.1));
    assert_eq!(region.btmright, Point2::new(0.6, 0.4));
    assert!((region.width() - 0.4).abs() < 1e-6);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("yolo26:///tmp/model.rknn").unwrap();
    assert!(matches!(
      Detection::<crate::tensor::TensorSet>::from_url(&url),
      Err(PipelineError::ModelPathError(_))
    ));
  }

  #[test]
  fn result_serializes_with_kind_tag() {
    let result = DetectResult::Regions(Box::new([]));
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["kind"], "regions");
    assert!(result.is_empty());
  }
}
