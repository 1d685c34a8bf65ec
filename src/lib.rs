// 该文件是 Kanjian （看见） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod config;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;

pub use crate::config::Settings;
pub use crate::task::{PipelineError, PredictRequest, PredictResponse, PredictTask};

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 读取全部内容；超过 `limit` 字节时返回 `None`
pub(crate) fn read_capped(reader: impl std::io::Read, limit: u64) -> std::io::Result<Option<Vec<u8>>> {
  use std::io::Read;

  let mut bytes = Vec::new();
  reader
    .take(limit.saturating_add(1))
    .read_to_end(&mut bytes)?;
  if bytes.len() as u64 > limit {
    Ok(None)
  } else {
    Ok(Some(bytes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn capped_read_accepts_up_to_limit() {
    let data = vec![1u8; 16];
    assert_eq!(read_capped(Cursor::new(&data), 16).unwrap(), Some(data.clone()));
    assert_eq!(read_capped(Cursor::new(&data), 15).unwrap(), None);
    assert_eq!(read_capped(Cursor::new(Vec::new()), 0).unwrap(), Some(Vec::new()));
  }
}
