// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/geometry.rs - 轴对齐矩形与 IoU
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

/// 边界框 `(left, top, width, height)`，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(into = "[f32; 4]")]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

impl From<BBox> for [f32; 4] {
  fn from(b: BBox) -> Self {
    [b.left, b.top, b.width, b.height]
  }
}

impl BBox {
  pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
    Self {
      left,
      top,
      width,
      height,
    }
  }

  pub fn right(&self) -> f32 {
    self.left + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.top + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn is_finite(&self) -> bool {
    self.left.is_finite() && self.top.is_finite() && self.width.is_finite() && self.height.is_finite()
  }

  pub fn intersection(&self, other: &BBox) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());
    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
  }

  /// 交并比；任一方面积为零时返回 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let area_a = self.area();
    let area_b = other.area();
    if area_a <= 0.0 || area_b <= 0.0 {
      return 0.0;
    }
    let intersection = self.intersection(other);
    let union = area_a + area_b - intersection;
    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identical_boxes_have_unit_iou() {
    let a = BBox::new(10.0, 10.0, 20.0, 20.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn disjoint_boxes_have_zero_iou() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(20.0, 20.0, 10.0, 10.0);
    assert_eq!(a.iou(&b), 0.0);
    assert_eq!(a.intersection(&b), 0.0);
  }

  #[test]
  fn partial_overlap() {
    // 交集 5x10 = 50，并集 100 + 100 - 50 = 150
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 0.0, 10.0, 10.0);
    assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), b.iou(&a));
  }

  #[test]
  fn zero_area_box_never_overlaps() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let line = BBox::new(2.0, 2.0, 0.0, 5.0);
    assert_eq!(a.iou(&line), 0.0);
    assert_eq!(line.iou(&a), 0.0);
    assert_eq!(line.iou(&line), 0.0);
  }

  #[test]
  fn serialises_as_array() {
    let json = serde_json::to_string(&BBox::new(1.0, 2.0, 3.0, 4.0)).unwrap();
    assert_eq!(json, "[1.0,2.0,3.0,4.0]");
  }
}
