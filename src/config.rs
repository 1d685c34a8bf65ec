// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{input::ChannelOrder, model::NmsScope};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MODEL_NAMESPACE: &str = "mlops-platform";
pub const DEFAULT_INPUT_NAME: &str = "images";
pub const DEFAULT_OUTPUT_NAME: &str = "output0";
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_SERVICE_HOST: &str = "localhost";
pub const DEFAULT_SERVICE_PORT: u16 = 8888;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("{name} 必须位于 (0, 1] 区间内, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("模型输入尺寸不能为零: {width}x{height}")]
  EmptyInputSize { width: u32, height: u32 },
  #[error("类别数量不能为零")]
  NoClasses,
}

/// 流水线配置
///
/// 所有字段在进程生命周期内只读，每个请求共享同一份配置。
#[derive(Debug, Clone)]
pub struct Settings {
  /// 模型输入宽度
  pub input_width: u32,
  /// 模型输入高度
  pub input_height: u32,
  /// 置信度阈值，同时用于解码过滤和绘制过滤
  pub conf_threshold: f32,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  pub nms_scope: NmsScope,
  /// 模型期望的通道顺序
  pub channel_order: ChannelOrder,
  /// 期望的类别数量；为 None 时由输出张量形状推断
  pub num_classes: Option<usize>,
  /// Triton 服务地址；为 None 时使用集群内地址
  pub triton_url: Option<String>,
  pub model_namespace: String,
  pub input_name: String,
  pub output_name: String,
  pub request_timeout: Duration,
  /// 结果图像保存目录
  pub static_dir: PathBuf,
  pub service_host: String,
  pub service_port: u16,
  /// 类别名称文件，每行一个名称
  pub labels_path: Option<PathBuf>,
  /// 标签字体文件
  pub font_path: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      nms_scope: NmsScope::default(),
      channel_order: ChannelOrder::default(),
      num_classes: None,
      triton_url: None,
      model_namespace: DEFAULT_MODEL_NAMESPACE.to_string(),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      output_name: DEFAULT_OUTPUT_NAME.to_string(),
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
      service_host: DEFAULT_SERVICE_HOST.to_string(),
      service_port: DEFAULT_SERVICE_PORT,
      labels_path: None,
      font_path: None,
    }
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if value > 0.0 && value <= 1.0 {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

impl Settings {
  pub fn validate(&self) -> Result<(), ConfigError> {
    check_threshold("conf_threshold", self.conf_threshold)?;
    check_threshold("iou_threshold", self.iou_threshold)?;
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::EmptyInputSize {
        width: self.input_width,
        height: self.input_height,
      });
    }
    if self.num_classes == Some(0) {
      return Err(ConfigError::NoClasses);
    }
    Ok(())
  }

  /// 解析推理服务地址
  ///
  /// 未显式配置时回退到 `{model_name}.{namespace}.svc.cluster.local:8000`。
  pub fn triton_endpoint(&self, model_name: &str) -> String {
    let raw = match &self.triton_url {
      Some(url) if !url.trim().is_empty() => url.trim().to_string(),
      _ => format!(
        "{}.{}.svc.cluster.local:8000",
        model_name, self.model_namespace
      ),
    };
    if raw.contains("://") {
      raw
    } else {
      format!("http://{}", raw)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_settings_are_valid() {
    let settings = Settings::default();
    assert_eq!(settings.validate(), Ok(()));
    assert_eq!(settings.input_width, 640);
    assert_eq!(settings.input_height, 640);
  }

  #[test]
  fn rejects_thresholds_outside_unit_interval() {
    let settings = Settings {
      conf_threshold: 0.0,
      ..Settings::default()
    };
    assert!(matches!(
      settings.validate(),
      Err(ConfigError::ThresholdOutOfRange { name: "conf_threshold", .. })
    ));

    let settings = Settings {
      iou_threshold: 1.5,
      ..Settings::default()
    };
    assert!(settings.validate().is_err());

    let settings = Settings {
      iou_threshold: 1.0,
      ..Settings::default()
    };
    assert!(settings.validate().is_ok());
  }

  #[test]
  fn rejects_zero_input_size() {
    let settings = Settings {
      input_width: 0,
      ..Settings::default()
    };
    assert!(matches!(
      settings.validate(),
      Err(ConfigError::EmptyInputSize { .. })
    ));
  }

  #[test]
  fn endpoint_falls_back_to_cluster_address() {
    let settings = Settings::default();
    assert_eq!(
      settings.triton_endpoint("onnx-model"),
      "http://onnx-model.mlops-platform.svc.cluster.local:8000"
    );

    let settings = Settings {
      triton_url: Some("localhost:30401".to_string()),
      ..Settings::default()
    };
    assert_eq!(settings.triton_endpoint("onnx-model"), "http://localhost:30401");

    let settings = Settings {
      triton_url: Some("https://triton.example.com".to_string()),
      ..Settings::default()
    };
    assert_eq!(
      settings.triton_endpoint("onnx-model"),
      "https://triton.example.com"
    );
  }
}
