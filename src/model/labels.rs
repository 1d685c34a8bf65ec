// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::info;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取类别文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("类别文件 {0} 为空")]
  Empty(String),
}

/// 只读的类别名称表，越界的类别编号退化为 `class_<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelTable {
  names: Box<[String]>,
}

impl Default for ClassLabelTable {
  fn default() -> Self {
    Self::coco()
  }
}

impl ClassLabelTable {
  pub fn coco() -> Self {
    Self::from_names(COCO_CLASSES.iter().copied())
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个类别名称，忽略空行
  pub fn from_file(path: &Path) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)
      .map_err(|e| LabelError::Io(path.display().to_string(), e))?;
    let table = Self::from_names(
      text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string),
    );
    if table.is_empty() {
      return Err(LabelError::Empty(path.display().to_string()));
    }
    info!("从 {} 加载 {} 个类别", path.display(), table.len());
    Ok(table)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: usize) -> Cow<'_, str> {
    match self.names.get(class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class_{}", class_id)),
    }
  }
}
