// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/objectron3d.rs - Objectron 三维物体检测后处理
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

use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::AsTensorSet,
  model::{
    Cuboid, DetectResult, Model, PipelineError, check_scheme,
    epnp::{self, CameraModel, NalgebraEigenSolver, Orientation},
    objectron::{self, VotingParams},
    query_or,
  },
};

// heatmap [1, 40, 30, 1]，offsetmap [1, 40, 30, 16]。
// 量化模型输出的 heatmap 未经 logistic，需要在解码前校准。
const OBJECTRON_MAX_OBJECTS: usize = 10;

const OBJECTRON_HEATMAP_TENSOR: &str = "heatmap";
const OBJECTRON_OFFSETMAP_TENSOR: &str = "offsetmap";

pub struct Objectron<Frame> {
  params: VotingParams,
  logistic: bool,
  camera: CameraModel,
  solver: NalgebraEigenSolver,
  max_objects: usize,
  _phantom: std::marker::PhantomData<Frame>,
}

pub struct ObjectronBuilder {
  params: VotingParams,
  logistic: bool,
  orientation: Orientation,
  max_objects: usize,
}

impl FromUrl for ObjectronBuilder {
  type Error = PipelineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme(url, Self::SCHEME)?;

    let defaults = VotingParams::default();
    let params = VotingParams {
      heatmap_threshold: query_or(url, "score", defaults.heatmap_threshold)?,
      voting_threshold: query_or(url, "vote", defaults.voting_threshold)?,
      ..defaults
    };

    Ok(ObjectronBuilder {
      params,
      logistic: query_or(url, "logistic", false)?,
      orientation: query_or(url, "orientation", Orientation::Portrait)?,
      max_objects: query_or(url, "max", OBJECTRON_MAX_OBJECTS)?,
    })
  }
}

impl FromUrlWithScheme for ObjectronBuilder {
  const SCHEME: &'static str = "objectron";
}

impl Default for ObjectronBuilder {
  fn default() -> Self {
    Self {
      params: VotingParams::default(),
      logistic: false,
      orientation: Orientation::Portrait,
      max_objects: OBJECTRON_MAX_OBJECTS,
    }
  }
}

impl ObjectronBuilder {
  pub fn params(mut self, params: VotingParams) -> Self {
    self.params = params;
    self
  }

  /// heatmap 是否需要 logistic 校准（量化模型）
  pub fn logistic(mut self, logistic: bool) -> Self {
    self.logistic = logistic;
    self
  }

  pub fn orientation(mut self, orientation: Orientation) -> Self {
    self.orientation = orientation;
    self
  }

  pub fn max_objects(mut self, max_objects: usize) -> Self {
    self.max_objects = max_objects;
    self
  }

  pub fn build<Frame>(self) -> Result<Objectron<Frame>, PipelineError> {
    if self.params.voting_allowance < 0.0 {
      return Err(PipelineError::InvalidParameter(
        "voting_allowance",
        self.params.voting_allowance.to_string(),
      ));
    }

    info!(
      "Objectron 后处理: 峰值阈值 {}, 投票阈值 {}, logistic {}, 方向 {:?}, 最多 {} 个物体",
      self.params.heatmap_threshold,
      self.params.voting_threshold,
      self.logistic,
      self.orientation,
      self.max_objects
    );

    Ok(Objectron {
      params: self.params,
      logistic: self.logistic,
      camera: CameraModel::objectron().with_orientation(self.orientation),
      solver: NalgebraEigenSolver::default(),
      max_objects: self.max_objects,
      _phantom: std::marker::PhantomData,
    })
  }
}

impl<Frame: AsTensorSet> Model for Objectron<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensors = input.as_tensor_set();
    let heatmap = tensors.get(OBJECTRON_HEATMAP_TENSOR)?.view_hwc()?;
    let offsets = tensors.get(OBJECTRON_OFFSETMAP_TENSOR)?.view_hwc()?;

    let candidates = objectron::decode_objectron(heatmap, offsets, &self.params, self.logistic)?;

    let mut objects = Vec::with_capacity(self.max_objects.min(candidates.len()));
    for candidate in candidates {
      if objects.len() >= self.max_objects {
        break;
      }

      let lifted = match epnp::lift_3d(&candidate.keypoints, &self.camera, &self.solver) {
        Ok(lifted) => lifted,
        Err(e) => {
          warn!("物体 (置信度 {:.3}) 三维解算失败, 已丢弃: {}", candidate.belief, e);
          continue;
        }
      };

      objects.push(Cuboid {
        belief: candidate.belief,
        center: candidate.center,
        keypoints: candidate.keypoints,
        bbox2d: epnp::reproject_2d(&lifted.bbox3d, &self.camera),
        bbox3d: lifted.bbox3d,
        center3d: lifted.center3d,
      });
    }

    debug!("检测到 {} 个三维物体", objects.len());
    Ok(DetectResult::Cuboids(objects.into_boxed_slice()))
  }
}
