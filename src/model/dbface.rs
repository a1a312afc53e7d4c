// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/dbface.rs - DBFace 人脸检测后处理
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::AsTensorSet,
  model::{DetectResult, Model, PipelineError, check_scheme, grid, nms, query_or},
};

// 无锚点的 CenterNet 结构，三个输出共享同一网格:
// heatmap [1, H, W, 1]，tlrb [1, H, W, 4]，landmark [1, H, W, 10] (5 个关键点)。
const DBFACE_NUM_KEYPOINTS: usize = 5;

const DBFACE_SCORE_THRESH: f32 = 0.4;
const DBFACE_IOU_THRESH: f32 = 0.5;
const DBFACE_MAX_FACES: usize = 10;

const DBFACE_HEATMAP_TENSOR: &str = "heatmap";
const DBFACE_TLRB_TENSOR: &str = "tlrb";
const DBFACE_LANDMARK_TENSOR: &str = "landmark";

pub struct DbFace<Frame> {
  score_threshold: f32,
  iou_threshold: f32,
  max_faces: usize,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct DbFaceBuilder {
  score_threshold: f32,
  iou_threshold: f32,
  max_faces: usize,
}

impl FromUrl for DbFaceBuilder {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    Ok(DbFaceBuilder {
      score_threshold: query_or(url, "score", DBFACE_SCORE_THRESH)?,
      iou_threshold: query_or(url, "iou", DBFACE_IOU_THRESH)?,
      max_faces: query_or(url, "max", DBFACE_MAX_FACES)?,
    })
  }
}

impl FromUrlWithScheme for DbFaceBuilder {
  const SCHEME: &'static str = "dbface";
}

impl Default for DbFaceBuilder {
  fn default() -> Self {
    Self {
      score_threshold: DBFACE_SCORE_THRESH,
      iou_threshold: DBFACE_IOU_THRESH,
      max_faces: DBFACE_MAX_FACES,
    }
  }
}

impl DbFaceBuilder {
  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn max_faces(mut self, max_faces: usize) -> Self {
    self.max_faces = max_faces;
    self
  }

  pub fn build<Frame>(self) -> Result<DbFace<Frame>, PipelineError> {
    info!(
      "DBFace 后处理: 分数阈值 {}, IoU 阈值 {}, 最多 {} 张人脸",
      self.score_threshold, self.iou_threshold, self.max_faces
    );

    Ok(DbFace {
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
      max_faces: self.max_faces,
      _phantom: std::marker::PhantomData,
    })
  }
}

impl<Frame: AsTensorSet> Model for DbFace<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensors = input.as_tensor_set();
    let heatmap = tensors.get(DBFACE_HEATMAP_TENSOR)?.view_hwc()?;
    let tlrb = tensors.get(DBFACE_TLRB_TENSOR)?.view_hwc()?;
    let landmarks = tensors.get(DBFACE_LANDMARK_TENSOR)?.view_hwc()?;

    let regions = grid::decode_centernet(
      heatmap,
      tlrb,
      landmarks,
      DBFACE_NUM_KEYPOINTS,
      self.score_threshold,
    )?;
    let faces = nms::suppress(&regions, self.iou_threshold, self.max_faces);

    debug!("检测到 {} 张人脸", faces.len());
    Ok(DetectResult::Regions(faces.into_boxed_slice()))
  }
}
