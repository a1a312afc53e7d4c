// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/roi.rs - 旋转角与感兴趣区域推导
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

use std::{f32::consts::FRAC_PI_2, str::FromStr};

use crate::{
  geometry::{Point2, normalize_radians},
  model::{DetectedRegion, OrientedRoi},
};

/// ROI 尺寸与中心的来源
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoiSize {
  /// 中心取 `center` 关键点，边长为 `center` 到 `edge` 距离的两倍
  Keypoints { center: usize, edge: usize },
  /// 中心与尺寸取检测框
  BoundingBox,
}

/// 第二阶段裁剪的参数，各个应用的取值不同
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiConfig {
  /// 定义朝向的两个关键点，方向为 `axis.0 -> axis.1`
  pub axis: (usize, usize),
  /// 该方向在裁剪图中应当对齐的角度
  pub target_angle: f32,
  pub size: RoiSize,
  pub scale: (f32, f32),
  /// 沿旋转后坐标轴的中心偏移，以框宽高为单位
  pub shift: (f32, f32),
}

impl RoiConfig {
  /// BlazeFace 人脸: 右眼到左眼水平，框长边 ×1.5
  pub const fn face() -> Self {
    Self {
      axis: (0, 1),
      target_angle: 0.0,
      size: RoiSize::BoundingBox,
      scale: (1.5, 1.5),
      shift: (0.0, 0.0),
    }
  }

  /// 年龄性别识别用的人脸裁剪，中心上移 0.3 个框高，长边 ×2.0
  pub const fn face_shifted() -> Self {
    Self {
      axis: (0, 1),
      target_angle: 0.0,
      size: RoiSize::BoundingBox,
      scale: (2.0, 2.0),
      shift: (0.0, -0.3),
    }
  }

  /// BlazePose: 髋部中心指向肩部中心朝上，以肩部为中心
  pub const fn pose() -> Self {
    Self {
      axis: (0, 2),
      target_angle: FRAC_PI_2,
      size: RoiSize::Keypoints { center: 2, edge: 3 },
      scale: (1.5, 1.5),
      shift: (0.0, 0.0),
    }
  }

  /// 手掌: 手腕指向中指根部朝上，长边 ×2.6，中心上移半个框高
  ///
  /// 常数取自 MediaPipe 手掌检测的 ROI 约定。
  pub const fn palm() -> Self {
    Self {
      axis: (0, 2),
      target_angle: FRAC_PI_2,
      size: RoiSize::BoundingBox,
      scale: (2.6, 2.6),
      shift: (0.0, -0.5),
    }
  }

  pub const fn with_scale(mut self, sx: f32, sy: f32) -> Self {
    self.scale = (sx, sy);
    self
  }

  pub const fn with_shift(mut self, sx: f32, sy: f32) -> Self {
    self.shift = (sx, sy);
    self
  }

  /// 推导并写回区域的旋转角和 ROI
  pub fn apply(&self, mut region: DetectedRegion, input_w: u32, input_h: u32) -> DetectedRegion {
    let (rotation, roi) = derive_roi(&region, self, input_w, input_h);
    region.rotation = rotation;
    region.roi = Some(roi);
    region
  }

  /// 区域需要的最少关键点数量
  pub fn required_keypoints(&self) -> usize {
    let mut needed = self.axis.0.max(self.axis.1) + 1;
    if let RoiSize::Keypoints { center, edge } = self.size {
      needed = needed.max(center.max(edge) + 1);
    }
    needed
  }
}

impl FromStr for RoiConfig {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "face" => Ok(RoiConfig::face()),
      "face_shifted" => Ok(RoiConfig::face_shifted()),
      "pose" => Ok(RoiConfig::pose()),
      "palm" => Ok(RoiConfig::palm()),
      other => Err(other.to_string()),
    }
  }
}

/// `target - atan2(-(b.y - a.y), b.x - a.x)`，归一化到 (-π, π]
///
/// 两点重合或含有非有限值时返回 0。
pub fn compute_rotation(a: Point2, b: Point2, target_angle: f32) -> f32 {
  let dx = b.x - a.x;
  let dy = b.y - a.y;
  if !(dx.is_finite() && dy.is_finite()) || (dx == 0.0 && dy == 0.0) {
    return 0.0;
  }
  normalize_radians(target_angle - (-dy).atan2(dx))
}

/// 由检测区域推导旋转角和旋转 ROI
///
/// 计算在检测器输入的像素空间进行，结果 x 按宽度、y 按高度归一化。
/// 关键点不足时按无朝向处理。
pub fn derive_roi(
  region: &DetectedRegion,
  config: &RoiConfig,
  input_w: u32,
  input_h: u32,
) -> (f32, OrientedRoi) {
  let (w, h) = (input_w as f32, input_h as f32);
  let to_pixel = |p: Point2| p.scale(w, h);
  let key = |index: usize| region.keypoints.get(index).copied().map(to_pixel);

  let rotation = match (key(config.axis.0), key(config.axis.1)) {
    (Some(a), Some(b)) => compute_rotation(a, b, config.target_angle),
    _ => 0.0,
  };

  let (center, width, height) = match config.size {
    RoiSize::Keypoints { center, edge } => match (key(center), key(edge)) {
      (Some(c), Some(e)) => {
        let size = c.distance(e) * 2.0;
        (c, size, size)
      }
      _ => (to_pixel(region.center()), 0.0, 0.0),
    },
    RoiSize::BoundingBox => (
      to_pixel(region.center()),
      region.width() * w,
      region.height() * h,
    ),
  };

  let shift = Point2::new(width * config.shift.0, height * config.shift.1).rotate(rotation);
  let center = center + shift;

  let long_side = width.max(height);
  let roi_w = long_side * config.scale.0;
  let roi_h = long_side * config.scale.1;
  let (dx, dy) = (roi_w * 0.5, roi_h * 0.5);

  let corners = [
    Point2::new(-dx, -dy),
    Point2::new(dx, -dy),
    Point2::new(dx, dy),
    Point2::new(-dx, dy),
  ]
  .map(|p| (p.rotate(rotation) + center).scale(1.0 / w, 1.0 / h));

  let roi = OrientedRoi {
    center: center.scale(1.0 / w, 1.0 / h),
    size: Point2::new(roi_w / w, roi_h / h),
    corners,
  };

  (rotation, roi)
}
