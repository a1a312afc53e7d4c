// 该文件是 Guanlan （观澜） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{ImageReader, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use tracing::warn;

use crate::{
  geometry::Point2,
  input::TensorFrame,
  model::{Cuboid, DetectResult, DetectedRegion},
};

const BOX_COLOR: [u8; 3] = [0, 0, 255];
const ROI_COLOR: [u8; 3] = [0, 255, 0];
const KEYPOINT_COLOR: [u8; 3] = [255, 0, 0];
const CUBOID_COLOR: [u8; 3] = [255, 255, 0];
const KEYPOINT_RADIUS: i32 = 2;

/// 没有原始图像时使用的画布尺寸
pub const DEFAULT_CANVAS: (u32, u32) = (640, 480);

/// 长方体 12 条棱，顶点编号与 EPnP 系数矩阵一致，两端编号只差一位
pub const CUBOID_EDGES: [(usize, usize); 12] = [
  (0, 1),
  (0, 2),
  (0, 4),
  (1, 3),
  (1, 5),
  (2, 3),
  (2, 6),
  (3, 7),
  (4, 5),
  (4, 6),
  (5, 7),
  (6, 7),
];

pub struct Draw {
  box_color: Rgb<u8>,
  roi_color: Rgb<u8>,
  keypoint_color: Rgb<u8>,
  cuboid_color: Rgb<u8>,
  keypoint_radius: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      box_color: Rgb(BOX_COLOR),
      roi_color: Rgb(ROI_COLOR),
      keypoint_color: Rgb(KEYPOINT_COLOR),
      cuboid_color: Rgb(CUBOID_COLOR),
      keypoint_radius: KEYPOINT_RADIUS,
    }
  }
}

/// 归一化坐标转像素坐标
fn to_pixel(image: &RgbImage, p: Point2) -> (f32, f32) {
  (p.x * image.width() as f32, p.y * image.height() as f32)
}

impl Draw {
  fn draw_polyline(&self, image: &mut RgbImage, points: &[Point2], color: Rgb<u8>) {
    for (i, &a) in points.iter().enumerate() {
      let b = points[(i + 1) % points.len()];
      let (start, end) = (to_pixel(image, a), to_pixel(image, b));
      draw_line_segment_mut(image, start, end, color);
    }
  }

  fn draw_keypoints(&self, image: &mut RgbImage, keypoints: &[Point2]) {
    for &p in keypoints {
      let (x, y) = to_pixel(image, p);
      draw_filled_circle_mut(
        image,
        (x.round() as i32, y.round() as i32),
        self.keypoint_radius,
        self.keypoint_color,
      );
    }
  }

  fn draw_region(&self, image: &mut RgbImage, region: &DetectedRegion) {
    let (x_min, y_min) = to_pixel(image, region.topleft);
    let (x_max, y_max) = to_pixel(image, region.btmright);
    let (w, h) = ((x_max - x_min).round() as u32, (y_max - y_min).round() as u32);
    if w > 0 && h > 0 {
      let rect = imageproc::rect::Rect::at(x_min.round() as i32, y_min.round() as i32).of_size(w, h);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }

    if let Some(roi) = &region.roi {
      self.draw_polyline(image, &roi.corners, self.roi_color);
    }
    self.draw_keypoints(image, &region.keypoints);
  }

  fn draw_cuboid(&self, image: &mut RgbImage, cuboid: &Cuboid) {
    for (a, b) in CUBOID_EDGES {
      let start = to_pixel(image, cuboid.bbox2d[a]);
      let end = to_pixel(image, cuboid.bbox2d[b]);
      draw_line_segment_mut(image, start, end, self.cuboid_color);
    }
    self.draw_keypoints(image, &cuboid.keypoints);
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    match result {
      DetectResult::Regions(regions) => {
        for region in regions.iter() {
          self.draw_region(image, region);
        }
      }
      DetectResult::Cuboids(cuboids) => {
        for cuboid in cuboids.iter() {
          self.draw_cuboid(image, cuboid);
        }
      }
    }
  }

  /// 在帧的原始图像上绘制，原始图像缺失或无法读取时使用黑色画布
  pub fn draw_detection(&self, frame: &TensorFrame, result: &DetectResult) -> RgbImage {
    let mut image = background_image(frame);
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

pub fn background_image(frame: &TensorFrame) -> RgbImage {
  let blank = || RgbImage::new(DEFAULT_CANVAS.0, DEFAULT_CANVAS.1);
  let Some(path) = frame.background() else {
    return blank();
  };

  match ImageReader::open(path).map_err(image::ImageError::IoError).and_then(|r| r.decode()) {
    Ok(image) => image.to_rgb8(),
    Err(e) => {
      warn!("无法读取第 {} 帧的图像 {}: {}", frame.index, path.display(), e);
      blank()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{geometry::Point3, model::OrientedRoi, tensor::TensorSet};

  #[test]
  fn cuboid_edges_differ_in_one_bit() {
    for (a, b) in CUBOID_EDGES {
      assert_eq!((a ^ b).count_ones(), 1);
    }
  }

  #[test]
  fn region_is_drawn() {
    let mut image = RgbImage::new(100, 100);
    let mut region = DetectedRegion::from_corners(0.9, Point2::new(0.2, 0.2), Point2::new(0.6, 0.6));
    region.keypoints = vec![Point2::new(0.4, 0.4)];
    region.roi = Some(OrientedRoi {
      center: Point2::new(0.5, 0.5),
      size: Point2::new(0.2, 0.2),
      corners: [
        Point2::new(0.4, 0.4),
        Point2::new(0.6, 0.4),
        Point2::new(0.6, 0.6),
        Point2::new(0.4, 0.6),
      ],
    });

    Draw::default().draw_detections_on_image(&mut image, &DetectResult::Regions(Box::new([region])));

    assert_eq!(image.get_pixel(20, 40), &Rgb(BOX_COLOR));
    assert_eq!(image.get_pixel(40, 40), &Rgb(KEYPOINT_COLOR));
    assert_eq!(image.get_pixel(50, 60), &Rgb(ROI_COLOR));
    assert_eq!(image.get_pixel(80, 80), &Rgb([0, 0, 0]));
  }

  #[test]
  fn cuboid_is_drawn() {
    let mut image = RgbImage::new(64, 64);
    let corners = std::array::from_fn(|k| {
      Point2::new(
        0.25 + 0.5 * ((k >> 2) & 1) as f32,
        0.25 + 0.5 * ((k >> 1) & 1) as f32,
      )
    });
    let cuboid = Cuboid {
      belief: 0.9,
      center: Point2::new(0.5, 0.5),
      keypoints: corners,
      bbox2d: corners,
      bbox3d: [Point3::new(0.0, 0.0, -1.0); 8],
      center3d: Point3::new(0.0, 0.0, -1.0),
    };

    Draw::default().draw_detections_on_image(&mut image, &DetectResult::Cuboids(Box::new([cuboid])));
    assert_eq!(image.get_pixel(32, 16), &Rgb(CUBOID_COLOR));
    assert_eq!(image.get_pixel(32, 32), &Rgb([0, 0, 0]));
  }

  #[test]
  fn missing_background_uses_blank_canvas() {
    let mut frame = TensorFrame::new(3, TensorSet::default());
    frame.background = Some("/nonexistent/guanlan/frame.png".into());
    let image = background_image(&frame);
    assert_eq!(image.dimensions(), DEFAULT_CANVAS);
  }
}
