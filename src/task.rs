// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测请求任务
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

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl,
  config::{ConfigError, Settings},
  input::{self, InputError, PreparedImage},
  model::{
    BBox, ClassLabelTable, DecodeConfig, DecodeError, DetectResult, LabelError, Model, NmsEngine,
    TritonBuilder, TritonError, decode,
  },
  output::{
    AnnotatedImageOutput, Annotator, Draw, OutputError, Render, SaveImageFileOutput,
  },
};

pub const DEFAULT_MODEL_NAME: &str = "onnx-model";
pub const DEFAULT_MODEL_VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入错误: {0}")]
  InputError(#[from] InputError),
  #[error("推理错误: {0}")]
  TritonError(#[from] TritonError),
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("输出错误: {0}")]
  OutputError(#[from] OutputError),
  #[error("类别表错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
}

impl PipelineError {
  /// 对应的 HTTP 状态码
  pub fn status_code(&self) -> u16 {
    match self {
      PipelineError::InputError(_) => 400,
      PipelineError::TritonError(TritonError::ServerUnreachable(_) | TritonError::ServerNotLive) => {
        503
      }
      _ => 500,
    }
  }
}

fn default_model_name() -> String {
  DEFAULT_MODEL_NAME.to_string()
}

fn default_model_version() -> String {
  DEFAULT_MODEL_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictRequest {
  #[serde(default = "default_model_name")]
  pub model_name: String,
  #[serde(default = "default_model_version")]
  pub model_version: String,
  pub image_url: String,
}

impl PredictRequest {
  pub fn new(image_url: impl Into<String>) -> Self {
    Self {
      model_name: default_model_name(),
      model_version: default_model_version(),
      image_url: image_url.into(),
    }
  }
}

/// 单个检测结果的对外表示
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
  pub class_id: usize,
  pub class_name: String,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictResponse {
  pub result_image_url: String,
  pub prediction: Vec<Prediction>,
}

/// 一次检测请求的完整流程：读取、推理、解码、NMS、绘制、保存
///
/// 类别表和调色板缓存由任务实例持有，各请求之间共享只读状态，可以在多个线程上并发调用。
pub struct PredictTask {
  settings: Settings,
  labels: Arc<ClassLabelTable>,
  nms: NmsEngine,
  output: AnnotatedImageOutput,
  model: Option<Arc<dyn Model>>,
}

impl PredictTask {
  pub fn new(settings: Settings) -> Result<Self, PipelineError> {
    settings.validate()?;

    let labels = Arc::new(match &settings.labels_path {
      Some(path) => ClassLabelTable::from_file(path)?,
      None => ClassLabelTable::coco(),
    });
    if let Some(n) = settings.num_classes
      && n != labels.len()
    {
      warn!("类别数量 {} 与类别表长度 {} 不一致", n, labels.len());
    }

    let draw = Draw::new(settings.font_path.as_deref()).map_err(OutputError::from)?;
    let annotator = Annotator::new(draw, labels.clone(), settings.conf_threshold);
    let store = SaveImageFileOutput::new(
      &settings.static_dir,
      &settings.service_host,
      settings.service_port,
    )
    .map_err(OutputError::from)?;

    info!(
      "任务初始化完成: 输入 {}x{}, 置信度阈值 {}, IoU 阈值 {}, NMS 范围 {:?}",
      settings.input_width,
      settings.input_height,
      settings.conf_threshold,
      settings.iou_threshold,
      settings.nms_scope
    );

    Ok(Self {
      nms: NmsEngine::with_scope(settings.nms_scope),
      output: AnnotatedImageOutput::new(annotator, store),
      labels,
      settings,
      model: None,
    })
  }

  /// 使用固定的推理后端，而不是按请求连接推理服务
  pub fn with_model(mut self, model: impl Model + 'static) -> Self {
    self.model = Some(Arc::new(model));
    self
  }

  pub fn with_nms(mut self, nms: NmsEngine) -> Self {
    self.nms = nms;
    self
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn labels(&self) -> &ClassLabelTable {
    &self.labels
  }

  pub fn nms(&self) -> &NmsEngine {
    &self.nms
  }

  pub fn output(&self) -> &AnnotatedImageOutput {
    &self.output
  }

  fn model_for(&self, model_name: &str, model_version: &str) -> Result<Arc<dyn Model>, TritonError> {
    if let Some(model) = &self.model {
      return Ok(model.clone());
    }

    let endpoint = self.settings.triton_endpoint(model_name);
    let url = Url::parse(&endpoint)
      .map_err(|e| TritonError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    let client = TritonBuilder::from_url(&url)?
      .model(model_name, model_version)
      .input_name(&self.settings.input_name)
      .output_name(&self.settings.output_name)
      .timeout(self.settings.request_timeout)
      .build()?;
    Ok(Arc::new(client))
  }

  fn decode_config(&self) -> DecodeConfig {
    DecodeConfig {
      input_width: self.settings.input_width,
      input_height: self.settings.input_height,
      conf_threshold: self.settings.conf_threshold,
      num_classes: self.settings.num_classes,
    }
  }

  pub fn prepare(&self, image_url: &str) -> Result<PreparedImage, InputError> {
    let url = Url::parse(image_url).map_err(|e| InputError::unavailable(image_url, e))?;
    input::ingest(
      &url,
      self.settings.input_width,
      self.settings.input_height,
      self.settings.channel_order,
    )
  }

  /// 对已准备好的图像做推理、解码和 NMS
  pub fn detect_prepared(
    &self,
    prepared: &PreparedImage,
    model_name: &str,
    model_version: &str,
  ) -> Result<DetectResult, PipelineError> {
    let model = self.model_for(model_name, model_version)?;

    let now = Instant::now();
    let raw = model.infer(&prepared.tensor)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    debug!("输出张量形状: {:?}", raw.shape());

    let candidates = decode(&raw, prepared.original_shape(), &self.decode_config())?;
    let result = self.nms.run(candidates, self.settings.iou_threshold);
    info!("检测到 {} 个目标", result.len());
    Ok(result)
  }

  /// 读取并检测，不绘制
  pub fn detect(&self, request: &PredictRequest) -> Result<(PreparedImage, DetectResult), PipelineError> {
    let prepared = self.prepare(&request.image_url)?;
    let result = self.detect_prepared(&prepared, &request.model_name, &request.model_version)?;
    Ok((prepared, result))
  }

  pub fn predictions(&self, result: &DetectResult) -> Vec<Prediction> {
    result
      .items
      .iter()
      .map(|d| Prediction {
        class_id: d.class_id,
        class_name: self.labels.name(d.class_id).into_owned(),
        score: d.score,
        bbox: d.bbox,
      })
      .collect()
  }

  pub fn predict(&self, request: &PredictRequest) -> Result<PredictResponse, PipelineError> {
    info!("处理请求: 模型 {}, 图像 {}", request.model_name, request.image_url);
    let (prepared, result) = self.detect(request)?;

    let now = Instant::now();
    let saved = self.output.render_result(&prepared.image, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(PredictResponse {
      result_image_url: saved.url.to_string(),
      prediction: self.predictions(&result),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_defaults_apply_when_fields_are_missing() {
    let request: PredictRequest =
      serde_json::from_str(r#"{"image_url": "http://example.com/a.jpg"}"#).unwrap();
    assert_eq!(request, PredictRequest::new("http://example.com/a.jpg"));
    assert_eq!(request.model_name, "onnx-model");
    assert_eq!(request.model_version, "1");
  }

  #[test]
  fn status_codes_follow_error_class() {
    let input = PipelineError::from(InputError::unavailable("x", "missing"));
    assert_eq!(input.status_code(), 400);
    assert_eq!(PipelineError::from(TritonError::ServerNotLive).status_code(), 503);
    assert_eq!(
      PipelineError::from(TritonError::ServerUnreachable("refused".into())).status_code(),
      503
    );
    assert_eq!(
      PipelineError::from(TritonError::InferenceError("bad input".into())).status_code(),
      500
    );
    assert_eq!(
      PipelineError::from(DecodeError::UnsupportedShape(vec![1])).status_code(),
      500
    );
  }

  #[test]
  fn prediction_serialises_bbox_as_array() {
    let response = PredictResponse {
      result_image_url: "http://localhost:8888/static/a.jpg".into(),
      prediction: vec![Prediction {
        class_id: 16,
        class_name: "dog".into(),
        score: 0.5,
        bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
      }],
    };
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["prediction"][0]["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    assert_eq!(value["prediction"][0]["class_name"], "dog");
  }

  #[test]
  fn invalid_settings_are_rejected() {
    let settings = Settings {
      iou_threshold: 1.5,
      ..Settings::default()
    };
    assert!(matches!(
      PredictTask::new(settings),
      Err(PipelineError::ConfigError(_))
    ));
  }

  #[test]
  fn malformed_image_url_is_client_error() {
    let task = PredictTask::new(Settings::default()).unwrap();
    let err = task.prepare("not a url").unwrap_err();
    assert_eq!(PipelineError::from(err).status_code(), 400);
  }
}
