// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, PoisonError, RwLock},
};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  model::{ClassLabelTable, DetectResult, Detection},
  output::Render,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 12;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 没有字体时每字符宽度的粗略估计
const LABEL_BOTTOM_PADDING: u32 = 5;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// 未配置字体时依次尝试的系统字体
static FALLBACK_FONTS: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {0}: {1}")]
  FontIo(PathBuf, std::io::Error),
  #[error("字体文件 {0} 无效")]
  InvalidFont(PathBuf),
}

/// 类别编号到显示颜色的映射，按编号取模访问
#[derive(Debug, Clone, PartialEq)]
pub struct ColorPalette {
  colors: Box<[Rgb<u8>]>,
}

impl ColorPalette {
  /// 在色相环上均匀取色
  pub fn generate(class_count: usize) -> Self {
    let count = class_count.max(1);
    let colors = (0..count)
      .map(|i| {
        let hue = (i as f32 / count as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }

  pub fn color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 按类别数量缓存调色板
///
/// 首次访问时构建；并发的首次访问可能重复构建，但只有一份会被保留。
#[derive(Debug, Default)]
pub struct PaletteCache {
  palettes: RwLock<HashMap<usize, Arc<ColorPalette>>>,
}

impl PaletteCache {
  pub fn get(&self, class_count: usize) -> Arc<ColorPalette> {
    if let Some(palette) = self
      .palettes
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&class_count)
    {
      return palette.clone();
    }

    let palette = Arc::new(ColorPalette::generate(class_count));
    debug!("生成 {} 色调色板", palette.len());
    self
      .palettes
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(class_count)
      .or_insert(palette)
      .clone()
  }

  pub fn len(&self) -> usize {
    self
      .palettes
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub fn label_text(labels: &ClassLabelTable, class_id: usize, score: f32) -> String {
  format!("{}: {:.2}", labels.name(class_id), score)
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: u32,
  label_char_width: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::with_font(None)
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|e| DrawError::FontIo(path.to_path_buf(), e))?;
  FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))
}

impl Draw {
  /// 加载指定字体；未指定时尝试常见的系统字体
  pub fn new(font_path: Option<&Path>) -> Result<Self, DrawError> {
    let font = match font_path {
      Some(path) => Some(load_font(path)?),
      None => {
        let found = FALLBACK_FONTS
          .iter()
          .map(Path::new)
          .find_map(|path| load_font(path).ok().map(|font| (path, font)));
        match found {
          Some((path, font)) => {
            info!("使用字体: {}", path.display());
            Some(font)
          }
          None => {
            warn!("未找到可用字体, 标签只绘制背景");
            None
          }
        }
      }
    };
    Ok(Self::with_font(font))
  }

  pub fn with_font(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn text_extent(&self, label: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => {
        let (w, h) = text_size(PxScale::from(self.font_size), font, label);
        (w, h.max(self.label_text_height))
      }
      None => (
        (label.chars().count() as f32 * self.label_char_width) as u32,
        self.label_text_height,
      ),
    }
  }

  /// 在图像上绘制一个检测框及其标签
  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection, label: &str, color: Rgb<u8>) {
    let (img_w, img_h) = (image.width(), image.height());
    let bbox = &detection.bbox;

    let x = bbox.left.floor().max(0.0) as i32;
    let y = bbox.top.floor().max(0.0) as i32;
    let w = bbox.width.round().max(0.0) as u32;
    let h = bbox.height.round().max(0.0) as u32;

    // 零面积的框不绘制
    if w == 0 || h == 0 || x as u32 >= img_w || y as u32 >= img_h {
      return;
    }

    // 绘制边框（加粗为2像素）
    for t in 0..BOX_THICKNESS {
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 标签背景位于边框上方，贴顶时下移到画面内
    let (text_w, text_h) = self.text_extent(label);
    let bg_height = text_h + LABEL_BOTTOM_PADDING;
    let label_x = x;
    let label_y = (y - bg_height as i32).max(0);
    let bg_width = text_w.min(img_w - x as u32);

    if bg_width == 0 {
      return;
    }
    let rect = Rect::at(label_x, label_y).of_size(bg_width, bg_height);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        LABEL_TEXT_COLOR,
        label_x,
        label_y,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  /// 在原图副本上绘制所有分数不低于 `threshold` 的检测框
  pub fn draw_detections(
    &self,
    image: &RgbImage,
    detections: &[Detection],
    labels: &ClassLabelTable,
    palette: &ColorPalette,
    threshold: f32,
  ) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections.iter().filter(|d| d.score >= threshold) {
      let label = label_text(labels, detection.class_id, detection.score);
      let color = palette.color(detection.class_id);
      self.draw_bbox_with_label(&mut canvas, detection, &label, color);
    }
    canvas
  }
}

/// 绘制器：字体、只读类别表与调色板缓存
pub struct Annotator {
  draw: Draw,
  labels: Arc<ClassLabelTable>,
  palettes: PaletteCache,
  threshold: f32,
}

impl Annotator {
  pub fn new(draw: Draw, labels: Arc<ClassLabelTable>, threshold: f32) -> Self {
    Self {
      draw,
      labels,
      palettes: PaletteCache::default(),
      threshold,
    }
  }

  pub fn labels(&self) -> &ClassLabelTable {
    &self.labels
  }

  pub fn palettes(&self) -> &PaletteCache {
    &self.palettes
  }
}

impl Render<RgbImage, DetectResult> for Annotator {
  type Rendered = RgbImage;
  type Error = DrawError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<RgbImage, DrawError> {
    let palette = self.palettes.get(self.labels.len());
    Ok(
      self
        .draw
        .draw_detections(frame, &result.items, &self.labels, &palette, self.threshold),
    )
  }
}
