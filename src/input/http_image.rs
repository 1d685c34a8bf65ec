// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/http_image.rs - HTTP 图像下载
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

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use crate::{FromUrl, input::InputError, read_capped};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

pub struct HttpImageInput {
  url: Url,
  agent: ureq::Agent,
  max_bytes: u64,
}

impl HttpImageInput {
  pub const SCHEMES: [&'static str; 2] = ["http", "https"];
}

impl FromUrl for HttpImageInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::SCHEMES.contains(&url.scheme()) {
      return Err(InputError::unavailable(url, "URI scheme mismatch"));
    }

    Ok(HttpImageInput {
      url: url.clone(),
      agent: ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build(),
      max_bytes: MAX_IMAGE_BYTES,
    })
  }
}

impl HttpImageInput {
  /// 图像大小上限
  pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
    self.max_bytes = max_bytes;
    self
  }

  pub fn fetch(&self) -> Result<Vec<u8>, InputError> {
    debug!("下载图像: {}", self.url);
    let response = self.agent.get(self.url.as_str()).call().map_err(|e| {
      warn!("图像下载失败: {}", e);
      InputError::unavailable(&self.url, e)
    })?;

    let bytes = read_capped(response.into_reader(), self.max_bytes)
      .map_err(|e| InputError::unavailable(&self.url, e))?
      .ok_or_else(|| {
        warn!("图像超过 {} 字节上限: {}", self.max_bytes, self.url);
        InputError::unavailable(&self.url, format!("图像超过 {} 字节上限", self.max_bytes))
      })?;
    debug!("图像下载完成: {} 字节", bytes.len());
    Ok(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    io::{Read, Write},
    net::TcpListener,
    thread::JoinHandle,
  };

  /// 应答一次 GET 请求，返回 `body_len` 字节的响应体
  fn serve_once(body_len: usize) -> (Url, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}/image.jpg", listener.local_addr().unwrap())).unwrap();
    let handle = std::thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 512];
      while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
      }
      let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body_len
      );
      stream.write_all(head.as_bytes()).unwrap();
      stream.write_all(&vec![7u8; body_len]).unwrap();
      stream.flush().unwrap();
    });
    (url, handle)
  }

  #[test]
  fn body_at_limit_is_accepted() {
    let (url, server) = serve_once(64);
    let input = HttpImageInput::from_url(&url).unwrap().with_max_bytes(64);
    assert_eq!(input.fetch().unwrap().len(), 64);
    server.join().unwrap();
  }

  #[test]
  fn oversized_body_is_rejected() {
    let (url, server) = serve_once(64);
    let input = HttpImageInput::from_url(&url).unwrap().with_max_bytes(16);
    match input.fetch() {
      Err(InputError::SourceUnavailable { reason, .. }) => assert!(reason.contains("16")),
      other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    }
    server.join().unwrap();
  }
}
