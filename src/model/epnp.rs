// 该文件是 Guanlan （观澜） 项目的一部分。
// src/model/epnp.rs - EPnP 三维解算与重投影
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

use std::str::FromStr;

use nalgebra::{DMatrix, DVector, Matrix4, SymmetricEigen, Vector4};
use thiserror::Error;

use crate::geometry::{Point2, Point3};

const NUM_VERTICES: usize = 8;
const NUM_CONTROL_POINTS: usize = 4;
const NUM_UNKNOWNS: usize = 3 * NUM_CONTROL_POINTS;

/// 长方体 8 个顶点在 4 个控制点下的仿射系数
///
/// 控制点 0 是中心，1..3 是中心加三个半轴。行号即顶点编号，2D 关键点必须使用同样的编号。
pub const EPNP_ALPHA: [[f32; NUM_CONTROL_POINTS]; NUM_VERTICES] = [
  [4.0, -1.0, -1.0, -1.0],
  [2.0, -1.0, -1.0, 1.0],
  [2.0, -1.0, 1.0, -1.0],
  [0.0, -1.0, 1.0, 1.0],
  [2.0, 1.0, -1.0, -1.0],
  [0.0, 1.0, -1.0, 1.0],
  [0.0, 1.0, 1.0, -1.0],
  [-2.0, 1.0, 1.0, 1.0],
];

#[derive(Error, Debug, PartialEq)]
pub enum EpnpError {
  #[error("特征分解未收敛")]
  NotConverged,
  #[error("特征值数量错误: 期望 {expected}, 实际 {actual}")]
  EigenvalueCount { expected: usize, actual: usize },
}

/// 图像方向，决定 2D 坐标与相机坐标轴的对应关系
///
/// 解算和重投影必须使用同一个值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
  /// 竖屏，图像 x 对应相机 y，图像 y 对应相机 x
  #[default]
  Portrait,
  Landscape,
}

impl FromStr for Orientation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "portrait" => Ok(Orientation::Portrait),
      "landscape" => Ok(Orientation::Landscape),
      other => Err(other.to_string()),
    }
  }
}

/// 投影矩阵与图像方向
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
  pub projection: Matrix4<f32>,
  pub orientation: Orientation,
}

impl CameraModel {
  /// objectron 模型训练时使用的相机
  pub fn objectron() -> Self {
    #[rustfmt::skip]
    let projection = Matrix4::new(
      1.5731, 0.0,    0.0,     0.0,
      0.0,    2.0975, 0.0,     0.0,
      0.0,    0.0,   -1.0002, -0.2,
      0.0,    0.0,   -1.0,     0.0,
    );

    Self {
      projection,
      orientation: Orientation::Portrait,
    }
  }

  pub fn with_orientation(mut self, orientation: Orientation) -> Self {
    self.orientation = orientation;
    self
  }

  /// `(fx, fy, cx, cy)`
  fn intrinsics(&self) -> (f64, f64, f64, f64) {
    let p = &self.projection;
    (
      p[(0, 0)] as f64,
      p[(1, 1)] as f64,
      p[(0, 2)] as f64,
      p[(1, 2)] as f64,
    )
  }

  /// 归一化图像坐标到裁剪空间的 `(u, v)`
  fn to_clip(&self, p: Point2) -> (f64, f64) {
    let (x, y) = (p.x as f64, p.y as f64);
    match self.orientation {
      Orientation::Portrait => (y * 2.0 - 1.0, x * 2.0 - 1.0),
      Orientation::Landscape => (x * 2.0 - 1.0, 1.0 - y * 2.0),
    }
  }
}

/// 对称矩阵特征分解
///
/// 实现必须按特征值升序返回，第 `i` 列特征向量对应第 `i` 个特征值。
pub trait SymmetricEigenSolver {
  fn solve(&self, matrix: DMatrix<f64>) -> Result<(DVector<f64>, DMatrix<f64>), EpnpError>;
}

/// 基于 nalgebra 的实现，其原始输出不保证顺序，这里显式排序
#[derive(Debug, Clone, Copy)]
pub struct NalgebraEigenSolver {
  pub epsilon: f64,
  pub max_iterations: usize,
}

impl Default for NalgebraEigenSolver {
  fn default() -> Self {
    Self {
      epsilon: f64::EPSILON,
      max_iterations: 1000,
    }
  }
}

impl SymmetricEigenSolver for NalgebraEigenSolver {
  fn solve(&self, matrix: DMatrix<f64>) -> Result<(DVector<f64>, DMatrix<f64>), EpnpError> {
    let n = matrix.nrows();
    let eigen = SymmetricEigen::try_new(matrix, self.epsilon, self.max_iterations)
      .ok_or(EpnpError::NotConverged)?;

    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let values = DVector::from_iterator(order.len(), order.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = DMatrix::from_fn(n, order.len(), |row, col| eigen.eigenvectors[(row, order[col])]);
    Ok((values, vectors))
  }
}

/// 3D 解算结果，相机坐标系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lifted {
  pub center3d: Point3,
  pub bbox3d: [Point3; NUM_VERTICES],
}

/// 由 8 个 2D 角点解算长方体的 3D 顶点（相差一个尺度）
///
/// 取 `MᵀM` 最小特征值对应的特征向量作为 4 个控制点，中心点 z 为正时整体取反，
/// 保证物体位于相机前方。
pub fn lift_3d(
  keypoints: &[Point2; NUM_VERTICES],
  camera: &CameraModel,
  solver: &impl SymmetricEigenSolver,
) -> Result<Lifted, EpnpError> {
  let (fx, fy, cx, cy) = camera.intrinsics();

  let mut m = DMatrix::<f64>::zeros(2 * NUM_VERTICES, NUM_UNKNOWNS);
  for (i, keypoint) in keypoints.iter().enumerate() {
    let (u, v) = camera.to_clip(*keypoint);
    for (j, &alpha) in EPNP_ALPHA[i].iter().enumerate() {
      let alpha = alpha as f64;
      m[(2 * i, 3 * j)] = fx * alpha;
      m[(2 * i, 3 * j + 2)] = (cx + u) * alpha;
      m[(2 * i + 1, 3 * j + 1)] = fy * alpha;
      m[(2 * i + 1, 3 * j + 2)] = (cy + v) * alpha;
    }
  }

  let mt_m = m.transpose() * &m;
  let (values, vectors) = solver.solve(mt_m)?;
  if values.len() != NUM_UNKNOWNS || vectors.ncols() != NUM_UNKNOWNS {
    return Err(EpnpError::EigenvalueCount {
      expected: NUM_UNKNOWNS,
      actual: values.len(),
    });
  }
  debug_assert!(
    values.iter().zip(values.iter().skip(1)).all(|(a, b)| a <= b),
    "特征值未按升序排列: {:?}",
    values
  );

  let smallest = vectors.column(0);
  let sign = if smallest[2] > 0.0 { -1.0 } else { 1.0 };
  let control: [[f64; 3]; NUM_CONTROL_POINTS] =
    std::array::from_fn(|j| std::array::from_fn(|k| sign * smallest[3 * j + k]));

  let bbox3d = EPNP_ALPHA.map(|alpha| {
    let mut vertex = [0.0f64; 3];
    for (weight, point) in alpha.iter().zip(&control) {
      for k in 0..3 {
        vertex[k] += *weight as f64 * point[k];
      }
    }
    Point3::new(vertex[0] as f32, vertex[1] as f32, vertex[2] as f32)
  });

  let center = control[0];
  Ok(Lifted {
    center3d: Point3::new(center[0] as f32, center[1] as f32, center[2] as f32),
    bbox3d,
  })
}

/// 投影到归一化图像坐标，方向处理与 [`lift_3d`] 相同
pub fn reproject_2d(points: &[Point3; NUM_VERTICES], camera: &CameraModel) -> [Point2; NUM_VERTICES] {
  (*points).map(|p| project_point(p, camera))
}

pub fn project_point(point: Point3, camera: &CameraModel) -> Point2 {
  let p = camera.projection * Vector4::new(point.x, point.y, point.z, 1.0);
  let inv_w = 1.0 / p[3];
  let (px, py) = (p[0] * inv_w, p[1] * inv_w);

  match camera.orientation {
    Orientation::Portrait => Point2::new((py + 1.0) * 0.5, (px + 1.0) * 0.5),
    Orientation::Landscape => Point2::new((px + 1.0) * 0.5, (1.0 - py) * 0.5),
  }
}
