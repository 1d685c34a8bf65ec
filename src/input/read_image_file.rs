// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 本地图像文件输入
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

use std::path::PathBuf;

use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::InputError};

pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "file";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::unavailable(url, "URI scheme mismatch"));
    }

    let path = url
      .to_file_path()
      .unwrap_or_else(|_| PathBuf::from(url.path()));

    Ok(ImageFileInput { path })
  }
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn fetch(&self) -> Result<Vec<u8>, InputError> {
    debug!("读取图像文件: {}", self.path.display());
    std::fs::read(&self.path).map_err(|e| InputError::unavailable(self.path.display(), e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_is_unavailable() {
    let input = ImageFileInput::new("/nonexistent/kanjian/dog.jpg");
    assert!(matches!(
      input.fetch(),
      Err(InputError::SourceUnavailable { .. })
    ));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("http://example.com/dog.jpg").unwrap();
    assert!(ImageFileInput::from_url(&url).is_err());
  }
}
