// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 图像输入与张量预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{FromUrl, frame::InputTensor};

/// 缩放插值策略，固定为双线性
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "fetch_image_http")]
mod http_image;
#[cfg(feature = "fetch_image_http")]
pub use self::http_image::HttpImageInput;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法获取图像 {source_url}: {reason}")]
  SourceUnavailable { source_url: String, reason: String },
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(#[from] image::ImageError),
}

impl InputError {
  pub fn unavailable(source_url: impl ToString, reason: impl ToString) -> Self {
    InputError::SourceUnavailable {
      source_url: source_url.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// 模型期望的通道顺序；解码结果总是 RGB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl std::str::FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知的通道顺序: {}", other)),
    }
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "fetch_image_http")]
  HttpImage(HttpImageInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    #[cfg(feature = "fetch_image_http")]
    {
      if HttpImageInput::SCHEMES.contains(&url.scheme()) {
        return Ok(InputWrapper::HttpImage(HttpImageInput::from_url(url)?));
      }
    }
    Err(InputError::unavailable(
      url,
      format!("不支持的 URI 方案 '{}'", url.scheme()),
    ))
  }
}

impl InputWrapper {
  pub fn fetch(&self) -> Result<Vec<u8>, InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.fetch(),
      #[cfg(feature = "fetch_image_http")]
      InputWrapper::HttpImage(input) => input.fetch(),
    }
  }
}

/// 解码后的原图及其模型输入张量
#[derive(Debug, Clone)]
pub struct PreparedImage {
  pub image: RgbImage,
  pub tensor: InputTensor,
}

impl PreparedImage {
  /// 原图尺寸 `(height, width)`
  pub fn original_shape(&self) -> (u32, u32) {
    (self.image.height(), self.image.width())
  }
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let image = image::load_from_memory(bytes)?;
  Ok(image.to_rgb8())
}

/// 缩放、换通道、归一化并转为 NCHW
pub fn prepare_tensor(
  image: &RgbImage,
  width: u32,
  height: u32,
  order: ChannelOrder,
) -> InputTensor {
  let resized = image::imageops::resize(image, width, height, RESIZE_FILTER);

  let mut tensor = InputTensor::with_shape(height, width);
  let plane = (width as usize) * (height as usize);
  let slice = tensor.as_mut();

  for (x, y, pixel) in resized.enumerate_pixels() {
    let idx = (y as usize) * (width as usize) + (x as usize);
    let [r, g, b] = pixel.0;
    let (c0, c2) = match order {
      ChannelOrder::Rgb => (r, b),
      ChannelOrder::Bgr => (b, r),
    };
    slice[idx] = c0 as f32 / 255.0;
    slice[plane + idx] = g as f32 / 255.0;
    slice[2 * plane + idx] = c2 as f32 / 255.0;
  }
  tensor
}

pub fn prepare_bytes(
  bytes: &[u8],
  width: u32,
  height: u32,
  order: ChannelOrder,
) -> Result<PreparedImage, InputError> {
  let image = decode_image(bytes)?;
  debug!(
    "图像解码完成: {}x{}, 缩放到 {}x{}",
    image.width(),
    image.height(),
    width,
    height
  );
  let tensor = prepare_tensor(&image, width, height, order);
  Ok(PreparedImage { image, tensor })
}

/// 从 URL 读取图像并生成模型输入
pub fn ingest(
  url: &url::Url,
  width: u32,
  height: u32,
  order: ChannelOrder,
) -> Result<PreparedImage, InputError> {
  let bytes = InputWrapper::from_url(url)?.fetch()?;
  prepare_bytes(&bytes, width, height, order)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
  }

  #[test]
  fn tensor_is_channel_first_and_normalised() {
    let image = solid(8, 6, [255, 0, 51]);
    let tensor = prepare_tensor(&image, 4, 4, ChannelOrder::Rgb);
    assert_eq!(tensor.shape(), [1, 3, 4, 4]);

    let data = tensor.as_nchw();
    assert!(data[..16].iter().all(|v| (v - 1.0).abs() < 1e-3));
    assert!(data[16..32].iter().all(|v| v.abs() < 1e-3));
    assert!(data[32..].iter().all(|v| (v - 0.2).abs() < 1e-2));
  }

  #[test]
  fn bgr_order_swaps_outer_planes() {
    let image = solid(4, 4, [255, 0, 0]);
    let tensor = prepare_tensor(&image, 2, 2, ChannelOrder::Bgr);
    let data = tensor.as_nchw();
    assert!(data[..4].iter().all(|v| v.abs() < 1e-3));
    assert!(data[8..].iter().all(|v| (v - 1.0).abs() < 1e-3));
  }

  #[test]
  fn preparation_is_deterministic() {
    let mut image = solid(13, 7, [10, 20, 30]);
    image.put_pixel(3, 3, Rgb([200, 100, 0]));
    let a = prepare_tensor(&image, 5, 5, ChannelOrder::Rgb);
    let b = prepare_tensor(&image, 5, 5, ChannelOrder::Rgb);
    assert_eq!(a, b);
  }

  #[test]
  fn garbage_bytes_are_unsupported() {
    let err = prepare_bytes(b"definitely not an image", 4, 4, ChannelOrder::Rgb).unwrap_err();
    assert!(matches!(err, InputError::UnsupportedFormat(_)));
  }

  #[test]
  fn unknown_scheme_is_unavailable() {
    let url = url::Url::parse("ftp://example.com/dog.jpg").unwrap();
    let err = ingest(&url, 4, 4, ChannelOrder::Rgb).unwrap_err();
    assert!(matches!(err, InputError::SourceUnavailable { .. }));
  }

  #[test]
  fn channel_order_parses() {
    assert_eq!("RGB".parse::<ChannelOrder>(), Ok(ChannelOrder::Rgb));
    assert_eq!("bgr".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
    assert!("rgba".parse::<ChannelOrder>().is_err());
  }
}
