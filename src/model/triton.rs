// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/triton.rs - Triton (KServe v2) HTTP 推理客户端
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  config::{DEFAULT_INPUT_NAME, DEFAULT_OUTPUT_NAME, DEFAULT_REQUEST_TIMEOUT},
  frame::{FrameError, InputTensor, RawOutputTensor},
  model::Model,
  read_capped,
};

/// 二进制张量扩展中 JSON 头部的长度
pub const HEADER_CONTENT_LENGTH: &str = "Inference-Header-Content-Length";

const FP32: &str = "FP32";
const TRITON_SCHEMES: [&str; 2] = ["http", "https"];
const MAX_RESPONSE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TritonError {
  #[error("无法连接推理服务: {0}")]
  ServerUnreachable(String),
  #[error("推理服务未运行")]
  ServerNotLive,
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("推理响应格式错误: {0}")]
  Protocol(String),
  #[error("推理服务地址无效: {0}")]
  InvalidEndpoint(String),
}

impl From<FrameError> for TritonError {
  fn from(err: FrameError) -> Self {
    TritonError::Protocol(err.to_string())
  }
}

impl From<serde_json::Error> for TritonError {
  fn from(err: serde_json::Error) -> Self {
    TritonError::Protocol(err.to_string())
  }
}

#[derive(Serialize, Debug)]
struct InferRequest<'a> {
  inputs: Vec<RequestInput<'a>>,
  outputs: Vec<RequestOutput<'a>>,
}

#[derive(Serialize, Debug)]
struct RequestInput<'a> {
  name: &'a str,
  shape: [usize; 4],
  datatype: &'a str,
  parameters: InputParameters,
}

#[derive(Serialize, Debug)]
struct InputParameters {
  binary_data_size: usize,
}

#[derive(Serialize, Debug)]
struct RequestOutput<'a> {
  name: &'a str,
  parameters: OutputRequestParameters,
}

#[derive(Serialize, Debug)]
struct OutputRequestParameters {
  binary_data: bool,
}

#[derive(Deserialize, Debug)]
struct InferResponse {
  #[serde(default)]
  model_name: Option<String>,
  #[serde(default)]
  model_version: Option<String>,
  #[serde(default)]
  outputs: Vec<ResponseOutput>,
}

#[derive(Deserialize, Debug)]
struct ResponseOutput {
  name: String,
  datatype: String,
  shape: Vec<usize>,
  #[serde(default)]
  data: Option<Vec<f32>>,
  #[serde(default)]
  parameters: Option<ResponseParameters>,
}

#[derive(Deserialize, Debug, Default)]
struct ResponseParameters {
  #[serde(default)]
  binary_data_size: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
  error: String,
}

/// 解析推理响应体，取出名为 `output_name` 的 FP32 张量
///
/// `header_length` 为 `Inference-Header-Content-Length` 的值；为 None 时整个响应体都是 JSON。
pub fn decode_infer_response(
  body: &[u8],
  header_length: Option<usize>,
  output_name: &str,
) -> Result<RawOutputTensor, TritonError> {
  let header_length = header_length.unwrap_or(body.len());
  if header_length > body.len() {
    return Err(TritonError::Protocol(format!(
      "JSON 头部长度 {} 超过响应体长度 {}",
      header_length,
      body.len()
    )));
  }
  let (header, mut binary) = body.split_at(header_length);
  let response: InferResponse = serde_json::from_slice(header)?;
  debug!(
    "推理响应: 模型 {:?} 版本 {:?}, {} 个输出",
    response.model_name,
    response.model_version,
    response.outputs.len()
  );

  for output in response.outputs {
    let binary_size = output
      .parameters
      .as_ref()
      .and_then(|p| p.binary_data_size);

    // 二进制数据按输出顺序依次排列，跳过不需要的输出
    let blob = match binary_size {
      Some(size) => {
        if size > binary.len() {
          return Err(TritonError::Protocol(format!(
            "输出 {} 的二进制数据不完整: 期望 {} 字节, 剩余 {} 字节",
            output.name,
            size,
            binary.len()
          )));
        }
        let (blob, rest) = binary.split_at(size);
        binary = rest;
        Some(blob)
      }
      None => None,
    };

    if output.name != output_name {
      continue;
    }
    if output.datatype != FP32 {
      return Err(TritonError::Protocol(format!(
        "输出 {} 的数据类型为 {}, 期望 {}",
        output.name, output.datatype, FP32
      )));
    }

    return match (blob, output.data) {
      (Some(blob), _) => Ok(RawOutputTensor::from_le_bytes(output.shape, blob)?),
      (None, Some(data)) => Ok(RawOutputTensor::new(output.shape, data)?),
      (None, None) => Err(TritonError::Protocol(format!(
        "输出 {} 没有数据",
        output.name
      ))),
    };
  }

  Err(TritonError::Protocol(format!(
    "响应中没有名为 {} 的输出",
    output_name
  )))
}

/// 从错误响应中提取服务端消息
fn error_message(code: u16, body: &str) -> String {
  match serde_json::from_str::<ErrorBody>(body) {
    Ok(ErrorBody { error }) => error,
    Err(_) if !body.trim().is_empty() => format!("HTTP {}: {}", code, body.trim()),
    Err(_) => format!("HTTP {}", code),
  }
}

pub struct TritonBuilder {
  base: Url,
  model_name: String,
  model_version: String,
  input_name: String,
  output_name: String,
  timeout: Duration,
}

impl FromUrl for TritonBuilder {
  type Error = TritonError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !TRITON_SCHEMES.contains(&url.scheme()) {
      return Err(TritonError::InvalidEndpoint(format!(
        "推理服务地址必须使用 http 或 https 方案: {}",
        url
      )));
    }

    let mut base = url.clone();
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    Ok(TritonBuilder {
      base,
      model_name: String::new(),
      model_version: String::new(),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      timeout: DEFAULT_REQUEST_TIMEOUT,
    })
  }
}

impl TritonBuilder {
  pub fn model(mut self, name: &str, version: &str) -> Self {
    self.model_name = name.to_string();
    self.model_version = version.to_string();
    self
  }

  pub fn input_name(mut self, name: &str) -> Self {
    self.input_name = name.to_string();
    self
  }

  pub fn output_name(mut self, name: &str) -> Self {
    self.output_name = name.to_string();
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn build(self) -> Result<TritonClient, TritonError> {
    if self.model_name.is_empty() {
      return Err(TritonError::InvalidEndpoint("未指定模型名称".to_string()));
    }

    let join = |path: &str| {
      self
        .base
        .join(path)
        .map_err(|e| TritonError::InvalidEndpoint(e.to_string()))
    };

    let live_url = join("v2/health/live")?;
    let model = urlencoding::encode(&self.model_name);
    let infer_path = if self.model_version.is_empty() {
      format!("v2/models/{}/infer", model)
    } else {
      format!(
        "v2/models/{}/versions/{}/infer",
        model,
        urlencoding::encode(&self.model_version)
      )
    };
    let infer_url = join(&infer_path)?;

    info!(
      "推理服务: {}, 模型 {} 版本 {}",
      self.base,
      self.model_name,
      if self.model_version.is_empty() {
        "latest"
      } else {
        self.model_version.as_str()
      }
    );

    Ok(TritonClient {
      live_url,
      infer_url,
      input_name: self.input_name,
      output_name: self.output_name,
      agent: ureq::AgentBuilder::new().timeout(self.timeout).build(),
    })
  }
}

/// 通过 KServe v2 HTTP 协议调用 Triton
pub struct TritonClient {
  live_url: Url,
  infer_url: Url,
  input_name: String,
  output_name: String,
  agent: ureq::Agent,
}

impl TritonClient {
  pub fn live_url(&self) -> &Url {
    &self.live_url
  }

  pub fn infer_url(&self) -> &Url {
    &self.infer_url
  }

  fn encode_request(&self, input: &InputTensor) -> Result<(Vec<u8>, usize), TritonError> {
    let tensor_bytes = input.to_le_bytes();
    let request = InferRequest {
      inputs: vec![RequestInput {
        name: &self.input_name,
        shape: input.shape(),
        datatype: FP32,
        parameters: InputParameters {
          binary_data_size: tensor_bytes.len(),
        },
      }],
      outputs: vec![RequestOutput {
        name: &self.output_name,
        parameters: OutputRequestParameters { binary_data: true },
      }],
    };

    let mut body = serde_json::to_vec(&request)?;
    let header_length = body.len();
    body.extend_from_slice(&tensor_bytes);
    Ok((body, header_length))
  }
}

impl Model for TritonClient {
  fn is_live(&self) -> Result<bool, TritonError> {
    match self.agent.get(self.live_url.as_str()).call() {
      Ok(response) => Ok(response.status() == 200),
      Err(ureq::Error::Status(code, _)) => {
        debug!("健康检查返回 HTTP {}", code);
        Ok(false)
      }
      Err(ureq::Error::Transport(e)) => {
        error!("健康检查失败: {}", e);
        Err(TritonError::ServerUnreachable(e.to_string()))
      }
    }
  }

  fn submit(&self, input: &InputTensor) -> Result<RawOutputTensor, TritonError> {
    let (body, header_length) = self.encode_request(input)?;
    debug!(
      "提交推理请求: {} 字节 (JSON 头部 {} 字节)",
      body.len(),
      header_length
    );

    let result = self
      .agent
      .post(self.infer_url.as_str())
      .set("Content-Type", "application/octet-stream")
      .set(HEADER_CONTENT_LENGTH, &header_length.to_string())
      .send_bytes(&body);

    let response = match result {
      Ok(response) => response,
      Err(ureq::Error::Status(code, response)) => {
        let text = response.into_string().unwrap_or_default();
        let message = error_message(code, &text);
        error!("推理服务返回错误: {}", message);
        return Err(TritonError::InferenceError(message));
      }
      Err(ureq::Error::Transport(e)) => {
        error!("推理请求失败: {}", e);
        return Err(TritonError::ServerUnreachable(e.to_string()));
      }
    };

    let header_length = match response.header(HEADER_CONTENT_LENGTH) {
      Some(value) => Some(value.trim().parse::<usize>().map_err(|e| {
        TritonError::Protocol(format!("{} 无效: {}", HEADER_CONTENT_LENGTH, e))
      })?),
      None => None,
    };

    let bytes = read_capped(response.into_reader(), MAX_RESPONSE_BYTES)
      .map_err(|e| TritonError::ServerUnreachable(e.to_string()))?
      .ok_or_else(|| {
        TritonError::Protocol(format!("推理响应超过 {} 字节上限", MAX_RESPONSE_BYTES))
      })?;

    decode_infer_response(&bytes, header_length, &self.output_name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base: &str, version: &str) -> TritonClient {
    TritonBuilder::from_url(&Url::parse(base).unwrap())
      .unwrap()
      .model("onnx-model", version)
      .build()
      .unwrap()
  }

  #[test]
  fn builds_v2_endpoints() {
    let c = client("http://localhost:8000", "1");
    assert_eq!(c.live_url().as_str(), "http://localhost:8000/v2/health/live");
    assert_eq!(
      c.infer_url().as_str(),
      "http://localhost:8000/v2/models/onnx-model/versions/1/infer"
    );

    let c = client("http://gateway/triton", "");
    assert_eq!(
      c.infer_url().as_str(),
      "http://gateway/triton/v2/models/onnx-model/infer"
    );
  }

  #[test]
  fn model_name_is_percent_encoded() {
    let c = TritonBuilder::from_url(&Url::parse("http://localhost:8000").unwrap())
      .unwrap()
      .model("yolo v11/n", "2")
      .build()
      .unwrap();
    assert_eq!(
      c.infer_url().path(),
      "/v2/models/yolo%20v11%2Fn/versions/2/infer"
    );
  }

  #[test]
  fn rejects_non_http_endpoints() {
    let url = Url::parse("grpc://localhost:8001").unwrap();
    assert!(matches!(
      TritonBuilder::from_url(&url),
      Err(TritonError::InvalidEndpoint(_))
    ));
  }

  #[test]
  fn request_header_describes_binary_input() {
    let c = client("http://localhost:8000", "1");
    let input = InputTensor::with_shape(2, 2);
    let (body, header_length) = c.encode_request(&input).unwrap();
    assert_eq!(body.len(), header_length + 12 * 4);

    let header: serde_json::Value = serde_json::from_slice(&body[..header_length]).unwrap();
    assert_eq!(header["inputs"][0]["name"], "images");
    assert_eq!(header["inputs"][0]["datatype"], "FP32");
    assert_eq!(header["inputs"][0]["shape"], serde_json::json!([1, 3, 2, 2]));
    assert_eq!(header["inputs"][0]["parameters"]["binary_data_size"], 48);
    assert_eq!(header["outputs"][0]["name"], "output0");
    assert_eq!(header["outputs"][0]["parameters"]["binary_data"], true);
  }

  #[test]
  fn decodes_json_response() {
    let body = serde_json::json!({
      "model_name": "onnx-model",
      "model_version": "1",
      "outputs": [
        {"name": "output0", "datatype": "FP32", "shape": [1, 5, 1], "data": [1.0, 2.0, 3.0, 4.0, 0.5]}
      ]
    })
    .to_string();
    let tensor = decode_infer_response(body.as_bytes(), None, "output0").unwrap();
    assert_eq!(tensor.shape(), &[1, 5, 1]);
    assert_eq!(tensor.data(), &[1.0, 2.0, 3.0, 4.0, 0.5]);
  }

  #[test]
  fn decodes_binary_response_skipping_other_outputs() {
    let wanted = [0.25f32, 0.5, 0.75, 1.0];
    let header = serde_json::json!({
      "outputs": [
        {"name": "aux", "datatype": "FP32", "shape": [2], "parameters": {"binary_data_size": 8}},
        {"name": "output0", "datatype": "FP32", "shape": [1, 4, 1], "parameters": {"binary_data_size": 16}}
      ]
    })
    .to_string();
    let mut body = header.clone().into_bytes();
    body.extend(9.0f32.to_le_bytes());
    body.extend(9.0f32.to_le_bytes());
    body.extend(wanted.iter().flat_map(|v| v.to_le_bytes()));

    let tensor = decode_infer_response(&body, Some(header.len()), "output0").unwrap();
    assert_eq!(tensor.data(), &wanted);
  }

  #[test]
  fn malformed_responses_are_protocol_errors() {
    let missing = serde_json::json!({"outputs": []}).to_string();
    assert!(matches!(
      decode_infer_response(missing.as_bytes(), None, "output0"),
      Err(TritonError::Protocol(_))
    ));

    let int_output = serde_json::json!({
      "outputs": [{"name": "output0", "datatype": "INT64", "shape": [1], "data": [1.0]}]
    })
    .to_string();
    assert!(matches!(
      decode_infer_response(int_output.as_bytes(), None, "output0"),
      Err(TritonError::Protocol(_))
    ));

    let truncated = serde_json::json!({
      "outputs": [{"name": "output0", "datatype": "FP32", "shape": [4], "parameters": {"binary_data_size": 16}}]
    })
    .to_string();
    let mut body = truncated.clone().into_bytes();
    body.extend([0u8; 4]);
    assert!(matches!(
      decode_infer_response(&body, Some(truncated.len()), "output0"),
      Err(TritonError::Protocol(_))
    ));

    assert!(decode_infer_response(b"not json", None, "output0").is_err());
    assert!(decode_infer_response(b"{}", Some(64), "output0").is_err());
  }

  #[test]
  fn overflowing_output_shape_is_a_protocol_error() {
    let body = serde_json::json!({
      "outputs": [{"name": "output0", "datatype": "FP32", "shape": [usize::MAX / 2 + 1, 2], "data": []}]
    })
    .to_string();
    assert!(matches!(
      decode_infer_response(body.as_bytes(), None, "output0"),
      Err(TritonError::Protocol(_))
    ));

    let header = serde_json::json!({
      "outputs": [{"name": "output0", "datatype": "FP32", "shape": [usize::MAX / 2 + 1, 2], "parameters": {"binary_data_size": 0}}]
    })
    .to_string();
    assert!(matches!(
      decode_infer_response(header.as_bytes(), Some(header.len()), "output0"),
      Err(TritonError::Protocol(_))
    ));
  }

  #[test]
  fn extracts_server_error_message() {
    assert_eq!(
      error_message(400, r#"{"error":"unexpected shape for input 'images'"}"#),
      "unexpected shape for input 'images'"
    );
    assert_eq!(error_message(502, "bad gateway"), "HTTP 502: bad gateway");
    assert_eq!(error_message(500, ""), "HTTP 500");
  }
}
