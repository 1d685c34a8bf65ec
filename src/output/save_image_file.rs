// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/save_image_file.rs - 保存标注结果图像
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
  fs::{File, OpenOptions},
  io::{BufWriter, ErrorKind, Write},
  path::{Path, PathBuf},
};

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

const JPEG_QUALITY: u8 = 95;
const MAX_NAME_ATTEMPTS: usize = 4;
const STATIC_ROUTE: &str = "static";

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法构造结果地址: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("连续 {0} 次生成的文件名均已存在")]
  NameExhausted(usize),
}

/// 已保存的结果图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
  pub file_name: String,
  pub path: PathBuf,
  pub url: Url,
}

/// 将图像以 `<uuid>.jpg` 写入静态目录，并给出可访问的地址
///
/// 文件以独占方式创建，已有文件永远不会被覆盖。
#[derive(Debug, Clone)]
pub struct SaveImageFileOutput {
  dir: PathBuf,
  base_url: Url,
}

impl SaveImageFileOutput {
  pub fn new(dir: impl Into<PathBuf>, host: &str, port: u16) -> Result<Self, SaveImageFileError> {
    let base_url = Url::parse(&format!("http://{}:{}/{}/", host, port, STATIC_ROUTE))?;
    Ok(Self {
      dir: dir.into(),
      base_url,
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn result_url(&self, file_name: &str) -> Result<Url, SaveImageFileError> {
    Ok(self.base_url.join(file_name)?)
  }

  pub fn save_image(&self, image: &RgbImage) -> Result<SavedImage, SaveImageFileError> {
    std::fs::create_dir_all(&self.dir)?;

    for _ in 0..MAX_NAME_ATTEMPTS {
      let file_name = format!("{}.jpg", Uuid::new_v4());
      let path = self.dir.join(&file_name);
      let written = write_exclusive(&path, |writer| {
        JpegEncoder::new_with_quality(writer, JPEG_QUALITY).encode_image(image)?;
        Ok(())
      });
      match written {
        Ok(()) => {}
        Err(SaveImageFileError::IoError(e)) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e),
      }

      let url = self.result_url(&file_name)?;
      info!("保存结果图像到文件: {}", path.display());
      return Ok(SavedImage {
        file_name,
        path,
        url,
      });
    }

    Err(SaveImageFileError::NameExhausted(MAX_NAME_ATTEMPTS))
  }
}

/// 独占创建文件并写入；写入失败时删除写了一半的文件
fn write_exclusive<F>(path: &Path, write: F) -> Result<(), SaveImageFileError>
where
  F: FnOnce(&mut BufWriter<File>) -> Result<(), SaveImageFileError>,
{
  let file = OpenOptions::new().write(true).create_new(true).open(path)?;
  let mut writer = BufWriter::new(file);
  let result = write(&mut writer).and_then(|()| Ok(writer.flush()?));

  if let Err(e) = result {
    drop(writer);
    if let Err(remove) = std::fs::remove_file(path) {
      warn!("无法删除未写完的文件 {}: {}", path.display(), remove);
    }
    return Err(e);
  }
  Ok(())
}
