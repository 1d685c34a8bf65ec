// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use crate::frame::{InputTensor, RawOutputTensor};

mod decode;
mod geometry;
mod labels;
mod nms;
mod triton;

pub use self::decode::{DecodeConfig, DecodeError, decode};
pub use self::geometry::BBox;
pub use self::labels::{COCO_CLASSES, ClassLabelTable, LabelError};
pub use self::nms::{GreedyNms, NmsEngine, NmsError, NmsScope, Suppressor};
pub use self::triton::{
  HEADER_CONTENT_LENGTH, TritonBuilder, TritonClient, TritonError, decode_infer_response,
};

/// 推理后端
///
/// 每次调用只做一次往返，不做内部重试。
pub trait Model: Send + Sync {
  /// 查询服务是否存活
  fn is_live(&self) -> Result<bool, TritonError>;

  /// 提交推理请求
  fn submit(&self, input: &InputTensor) -> Result<RawOutputTensor, TritonError>;

  /// 先检查存活再提交
  fn infer(&self, input: &InputTensor) -> Result<RawOutputTensor, TritonError> {
    if !self.is_live()? {
      return Err(TritonError::ServerNotLive);
    }
    self.submit(input)
  }
}

/// 解码后的候选框，坐标位于原图像素空间
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
  pub bbox: BBox,
  pub score: f32,
  pub class_id: usize,
  /// 在输出张量中的行号，用作稳定排序键
  pub row: usize,
}

/// NMS 之后保留的候选框
pub type Detection = Candidate;

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
  /// NMS 失败后是否退回到了未过滤的候选列表
  pub nms_fallback: bool,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}
