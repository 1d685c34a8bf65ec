// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/simple.rs - 推理测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl, PredictTask, Settings,
  input::{ImageFileInput, prepare_bytes},
  output::Render,
  task::{DEFAULT_MODEL_NAME, DEFAULT_MODEL_VERSION},
};

/// 单张图像检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像（file:// 地址）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注结果保存路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 推理服务地址
  #[arg(long, env = "TRITON_URL")]
  pub triton_url: Option<String>,
  #[arg(long, default_value = DEFAULT_MODEL_NAME)]
  pub model_name: String,
  #[arg(long, default_value = DEFAULT_MODEL_VERSION)]
  pub model_version: String,
  /// 置信度阈值
  #[arg(long, default_value_t = 0.5)]
  pub confidence: f32,
  /// NMS IoU 阈值
  #[arg(long, default_value_t = 0.5)]
  pub iou_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output.display());

  let settings = Settings {
    triton_url: args.triton_url.clone(),
    conf_threshold: args.confidence,
    iou_threshold: args.iou_threshold,
    ..Settings::default()
  };
  let task = PredictTask::new(settings)?;

  let input = ImageFileInput::from_url(&args.input)?;
  let settings = task.settings();
  let prepared = prepare_bytes(
    &input.fetch()?,
    settings.input_width,
    settings.input_height,
    settings.channel_order,
  )?;

  info!("开始推理...");
  let result = task.detect_prepared(&prepared, &args.model_name, &args.model_version)?;

  println!("检测到 {} 个目标:", result.len());
  for det in result.items.iter() {
    println!(
      "  - {}: {:.2} at ({:.0}, {:.0}, {:.0}x{:.0})",
      task.labels().name(det.class_id),
      det.score,
      det.bbox.left,
      det.bbox.top,
      det.bbox.width,
      det.bbox.height
    );
  }

  let image = task
    .output()
    .annotator()
    .render_result(&prepared.image, &result)?;
  image.save(&args.output)?;
  info!("结果已保存到 {}", args.output.display());

  Ok(())
}
