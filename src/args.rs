// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use kanjian::{
  Settings,
  config::{
    DEFAULT_CONF_THRESHOLD, DEFAULT_INPUT_NAME, DEFAULT_INPUT_SIZE, DEFAULT_IOU_THRESHOLD,
    DEFAULT_MODEL_NAMESPACE, DEFAULT_OUTPUT_NAME, DEFAULT_SERVICE_HOST, DEFAULT_SERVICE_PORT,
    DEFAULT_STATIC_DIR,
  },
  input::ChannelOrder,
  model::NmsScope,
  task::{DEFAULT_MODEL_NAME, DEFAULT_MODEL_VERSION},
};

/// Kanjian 目标检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测图像地址，可重复指定（http://, https://, file://）
  #[arg(long = "image-url", value_name = "URL", required = true)]
  pub image_urls: Vec<String>,

  /// 模型名称
  #[arg(long, default_value = DEFAULT_MODEL_NAME)]
  pub model_name: String,

  /// 模型版本，留空则使用服务端最新版本
  #[arg(long, default_value = DEFAULT_MODEL_VERSION)]
  pub model_version: String,

  /// 模型输入宽度
  #[arg(long, env = "INPUT_WIDTH", default_value_t = DEFAULT_INPUT_SIZE)]
  pub input_width: u32,

  /// 模型输入高度
  #[arg(long, env = "INPUT_HEIGHT", default_value_t = DEFAULT_INPUT_SIZE)]
  pub input_height: u32,

  /// 置信度阈值 (0.0 - 1.0]
  #[arg(long, env = "CONF_THRESHOLD", default_value_t = DEFAULT_CONF_THRESHOLD, value_name = "THRESHOLD")]
  pub conf_threshold: f32,

  /// NMS IoU 阈值 (0.0 - 1.0]
  #[arg(long, env = "IOU_THRESHOLD", default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// NMS 范围: global 或 per-class
  #[arg(long, env = "NMS_SCOPE", default_value = "global")]
  pub nms_scope: NmsScope,

  /// 模型期望的通道顺序: rgb 或 bgr
  #[arg(long, env = "CHANNEL_ORDER", default_value = "rgb")]
  pub channel_order: ChannelOrder,

  /// 模型类别数量，用于校验输出张量
  #[arg(long, env = "NUM_CLASSES")]
  pub num_classes: Option<usize>,

  /// 推理服务地址，未指定时按集群内服务名推导
  #[arg(long, env = "TRITON_URL")]
  pub triton_url: Option<String>,

  /// 推理服务所在命名空间
  #[arg(long, env = "MODEL_NAMESPACE", default_value = DEFAULT_MODEL_NAMESPACE)]
  pub model_namespace: String,

  /// 模型输入张量名称
  #[arg(long, env = "INPUT_NAME", default_value = DEFAULT_INPUT_NAME)]
  pub input_name: String,

  /// 模型输出张量名称
  #[arg(long, env = "OUTPUT_NAME", default_value = DEFAULT_OUTPUT_NAME)]
  pub output_name: String,

  /// 推理请求超时（秒）
  #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30, value_name = "SECONDS")]
  pub request_timeout: u64,

  /// 结果图像保存目录
  #[arg(long, env = "STATIC_DIR", default_value = DEFAULT_STATIC_DIR)]
  pub static_dir: PathBuf,

  /// 对外服务主机名，用于生成结果地址
  #[arg(long, env = "SERVICE_HOST", default_value = DEFAULT_SERVICE_HOST)]
  pub service_host: String,

  /// 对外服务端口
  #[arg(long, env = "SERVICE_PORT", default_value_t = DEFAULT_SERVICE_PORT)]
  pub service_port: u16,

  /// 类别名称文件，每行一个
  #[arg(long, env = "LABELS_PATH", value_name = "FILE")]
  pub labels_path: Option<PathBuf>,

  /// 标签字体文件
  #[arg(long, env = "FONT_PATH", value_name = "FILE")]
  pub font_path: Option<PathBuf>,
}

impl Args {
  pub fn settings(&self) -> Settings {
    Settings {
      input_width: self.input_width,
      input_height: self.input_height,
      conf_threshold: self.conf_threshold,
      iou_threshold: self.iou_threshold,
      nms_scope: self.nms_scope,
      channel_order: self.channel_order,
      num_classes: self.num_classes,
      triton_url: self.triton_url.clone(),
      model_namespace: self.model_namespace.clone(),
      input_name: self.input_name.clone(),
      output_name: self.output_name.clone(),
      request_timeout: Duration::from_secs(self.request_timeout),
      static_dir: self.static_dir.clone(),
      service_host: self.service_host.clone(),
      service_port: self.service_port,
      labels_path: self.labels_path.clone(),
      font_path: self.font_path.clone(),
    }
  }
}
