// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;

use crate::model::DetectResult;

pub trait Render<Frame, Output> {
  type Rendered;
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<Self::Rendered, Self::Error>;
}

pub mod draw;
mod save_image_file;

pub use self::draw::{Annotator, ColorPalette, Draw, DrawError, PaletteCache, label_text};
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput, SavedImage};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
}

/// 绘制检测结果并保存到静态目录
pub struct AnnotatedImageOutput {
  annotator: Annotator,
  store: SaveImageFileOutput,
}

impl AnnotatedImageOutput {
  pub fn new(annotator: Annotator, store: SaveImageFileOutput) -> Self {
    Self { annotator, store }
  }

  pub fn annotator(&self) -> &Annotator {
    &self.annotator
  }

  pub fn store(&self) -> &SaveImageFileOutput {
    &self.store
  }
}

impl Render<RgbImage, DetectResult> for AnnotatedImageOutput {
  type Rendered = SavedImage;
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<SavedImage, OutputError> {
    let image = self.annotator.render_result(frame, result)?;
    Ok(self.store.save_image(&image)?)
  }
}
