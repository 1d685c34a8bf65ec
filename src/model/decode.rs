// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/decode.rs - 检测输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::RawOutputTensor,
  model::{BBox, Candidate},
};

/// 每行前 4 个值为 cx, cy, w, h
const BOX_PARAMS: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出张量维度不受支持: {0:?}")]
  UnsupportedShape(Vec<usize>),
  #[error("输出张量通道数 {channels} 过少, 至少需要 {min}")]
  TooFewChannels { channels: usize, min: usize },
  #[error("输出张量通道数 {channels} 与类别数量 {num_classes} 不符")]
  ClassCountMismatch { channels: usize, num_classes: usize },
  #[error("输出张量数据长度 {actual} 与形状 {shape:?} 不符")]
  LengthMismatch { shape: Vec<usize>, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeConfig {
  pub input_width: u32,
  pub input_height: u32,
  pub conf_threshold: f32,
  /// 已知类别数量时用于校验和判断排列方向
  pub num_classes: Option<usize>,
}

/// 去掉批次维后的二维视图，屏蔽两种排列方向
struct Rows<'a> {
  data: &'a [f32],
  rows: usize,
  channels: usize,
  channel_major: bool,
}

impl<'a> Rows<'a> {
  fn from_tensor(tensor: &'a RawOutputTensor, num_classes: Option<usize>) -> Result<Self, DecodeError> {
    let shape = tensor.shape();
    let (a, b) = match *shape {
      [1, a, b] => (a, b),
      [a, 1, b] => (a, b),
      [a, b] => (a, b),
      _ => return Err(DecodeError::UnsupportedShape(shape.to_vec())),
    };

    if a.checked_mul(b) != Some(tensor.data().len()) {
      return Err(DecodeError::LengthMismatch {
        shape: shape.to_vec(),
        actual: tensor.data().len(),
      });
    }

    // 默认按 (4 + C) x N 解释；仅当类别数已知且只有第二维吻合时按 N x (4 + C)
    let channel_major = match num_classes {
      Some(c) => !(b == BOX_PARAMS + c && a != BOX_PARAMS + c),
      None => true,
    };
    let (channels, rows) = if channel_major { (a, b) } else { (b, a) };

    let min = BOX_PARAMS + 1;
    if channels < min {
      return Err(DecodeError::TooFewChannels { channels, min });
    }
    if let Some(c) = num_classes
      && channels != BOX_PARAMS + c
    {
      return Err(DecodeError::ClassCountMismatch {
        channels,
        num_classes: c,
      });
    }

    Ok(Self {
      data: tensor.data(),
      rows,
      channels,
      channel_major,
    })
  }

  fn value(&self, row: usize, channel: usize) -> f32 {
    if self.channel_major {
      self.data[channel * self.rows + row]
    } else {
      self.data[row * self.channels + channel]
    }
  }

  /// 最高类别分数及其编号，并列时取最小编号
  fn best_class(&self, row: usize) -> (f32, usize) {
    let mut best_score = f32::NEG_INFINITY;
    let mut best_class = 0usize;
    for channel in BOX_PARAMS..self.channels {
      let score = self.value(row, channel);
      if score > best_score {
        best_score = score;
        best_class = channel - BOX_PARAMS;
      }
    }
    (best_score, best_class)
  }
}

/// 将原始输出解码为原图坐标系下的候选框
///
/// `original_shape` 为 `(height, width)`。返回顺序与输出张量行顺序一致。
pub fn decode(
  tensor: &RawOutputTensor,
  original_shape: (u32, u32),
  config: &DecodeConfig,
) -> Result<Vec<Candidate>, DecodeError> {
  let rows = Rows::from_tensor(tensor, config.num_classes)?;

  let (img_height, img_width) = (original_shape.0 as f32, original_shape.1 as f32);
  let scale_x = img_width / config.input_width as f32;
  let scale_y = img_height / config.input_height as f32;

  let mut candidates = Vec::new();
  for row in 0..rows.rows {
    let (score, class_id) = rows.best_class(row);
    // NaN 也在这里被丢弃
    if !(score >= config.conf_threshold) {
      continue;
    }

    let x = rows.value(row, 0);
    let y = rows.value(row, 1);
    let w = rows.value(row, 2);
    let h = rows.value(row, 3);
    if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
      debug!("第 {} 行边界框包含非有限值, 已丢弃", row);
      continue;
    }

    let left = ((x - w / 2.0) * scale_x).clamp(0.0, img_width);
    let top = ((y - h / 2.0) * scale_y).clamp(0.0, img_height);
    let width = (w * scale_x).min(img_width - left).max(0.0);
    let height = (h * scale_y).min(img_height - top).max(0.0);

    candidates.push(Candidate {
      bbox: BBox::new(left, top, width, height),
      score: score.min(1.0),
      class_id,
      row,
    });
  }

  debug!(
    "解码 {} 行输出, {} 个候选框超过阈值 {}",
    rows.rows,
    candidates.len(),
    config.conf_threshold
  );
  Ok(candidates)
}
