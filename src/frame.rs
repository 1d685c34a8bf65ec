// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - NCHW 张量定义
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

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("张量形状 {0:?} 的元素数量溢出")]
  ShapeOverflow(Vec<usize>),
}

const F32_BYTES: usize = 4;

/// 形状对应的元素数量，乘积溢出时报错
fn element_count(shape: &[usize]) -> Result<usize, FrameError> {
  shape
    .iter()
    .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    .ok_or_else(|| FrameError::ShapeOverflow(shape.to_vec()))
}

/// 模型输入张量，形状固定为 1x3xHxW，取值范围 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  width: u32,
  height: u32,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn with_shape(height: u32, width: u32) -> Self {
    let size = RGB_CHANNELS * (width as usize) * (height as usize);
    Self {
      width,
      height,
      data: vec![0.0f32; size].into_boxed_slice(),
    }
  }

  pub fn from_vec(height: u32, width: u32, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * (width as usize) * (height as usize);
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height as usize
  }

  pub fn width(&self) -> usize {
    self.width as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 带批次维度的形状 `[1, 3, H, W]`
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height(), self.width()]
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  /// 按小端序展开为字节，用于二进制张量传输
  pub fn to_le_bytes(&self) -> Vec<u8> {
    self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
  }
}

impl AsMut<[f32]> for InputTensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

/// 模型原始输出张量
///
/// 约定形状为 `1 x (4 + C) x N`，解码器负责处理其它等价排列。
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutputTensor {
  shape: Vec<usize>,
  data: Box<[f32]>,
}

impl RawOutputTensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected = element_count(&shape)?;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  /// 从小端序字节构造
  pub fn from_le_bytes(shape: Vec<usize>, bytes: &[u8]) -> Result<Self, FrameError> {
    let expected = element_count(&shape)?
      .checked_mul(F32_BYTES)
      .ok_or_else(|| FrameError::ShapeOverflow(shape.clone()))?;
    if bytes.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: bytes.len(),
      });
    }
    let data = bytes
      .chunks_exact(F32_BYTES)
      .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect();
    Self::new(shape, data)
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}
