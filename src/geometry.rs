// 该文件是 Guanlan （观澜） 项目的一部分。
// src/geometry.rs - 基础几何类型
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

use std::f32::consts::PI;
use std::ops::{Add, Mul, Sub};

use serde::Serialize;

/// 二维点，通常是归一化的图像坐标（不做截断）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point2 {
  pub x: f32,
  pub y: f32,
}

/// 三维点，相机坐标系
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Point3 {
  pub x: f32,
  pub y: f32,
  pub z: f32,
}

impl Point2 {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  /// 绕原点逆时针旋转 `angle` 弧度
  pub fn rotate(self, angle: f32) -> Self {
    let (sin, cos) = angle.sin_cos();
    Self {
      x: self.x * cos - self.y * sin,
      y: self.x * sin + self.y * cos,
    }
  }

  pub fn distance(self, other: Self) -> f32 {
    (self.x - other.x).hypot(self.y - other.y)
  }

  /// 分量分别缩放
  pub fn scale(self, sx: f32, sy: f32) -> Self {
    Self {
      x: self.x * sx,
      y: self.y * sy,
    }
  }

  pub fn is_finite(self) -> bool {
    self.x.is_finite() && self.y.is_finite()
  }
}

impl Point3 {
  pub const fn new(x: f32, y: f32, z: f32) -> Self {
    Self { x, y, z }
  }
}

impl Add for Point2 {
  type Output = Point2;

  fn add(self, rhs: Self) -> Self::Output {
    Point2::new(self.x + rhs.x, self.y + rhs.y)
  }
}

impl Sub for Point2 {
  type Output = Point2;

  fn sub(self, rhs: Self) -> Self::Output {
    Point2::new(self.x - rhs.x, self.y - rhs.y)
  }
}

impl Mul<f32> for Point2 {
  type Output = Point2;

  fn mul(self, rhs: f32) -> Self::Output {
    Point2::new(self.x * rhs, self.y * rhs)
  }
}

/// 将角度归一化到 (-π, π]
///
/// 落在区间内的值原样返回，因此该函数是幂等的。
pub fn normalize_radians(angle: f32) -> f32 {
  if angle > -PI && angle <= PI {
    return angle;
  }
  if !angle.is_finite() {
    return 0.0;
  }

  let mut normalized = angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor();
  // floor 之后的舍入误差可能把结果推到区间外
  if normalized <= -PI {
    normalized += 2.0 * PI;
  }
  if normalized > PI {
    normalized -= 2.0 * PI;
  }
  normalized
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  #[test]
  fn normalize_lands_in_half_open_interval() {
    let mut angle = -20.0f32;
    while angle < 20.0 {
      let n = normalize_radians(angle);
      assert!(n > -PI && n <= PI, "{} -> {}", angle, n);
      assert_eq!(normalize_radians(n), n);
      angle += 0.37;
    }
  }

  #[test]
  fn normalize_boundaries() {
    assert_eq!(normalize_radians(PI), PI);
    assert_eq!(normalize_radians(-PI), PI);
    assert_abs_diff_eq!(normalize_radians(-1.5 * PI), 0.5 * PI, epsilon = 1e-5);
    assert_abs_diff_eq!(normalize_radians(2.0 * PI + 0.5), 0.5, epsilon = 1e-5);
    assert_eq!(normalize_radians(f32::NAN), 0.0);
  }

  #[test]
  fn rotate_quarter_turn() {
    let p = Point2::new(1.0, 0.0).rotate(PI / 2.0);
    assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(p.y, 1.0, epsilon = 1e-6);
  }

  #[test]
  fn sigmoid_midpoint() {
    assert_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(3.0) > 0.95);
  }
}
