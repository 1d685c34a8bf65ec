// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use kanjian::{PredictRequest, PredictTask};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let task = PredictTask::new(args.settings())?;

  info!(
    "模型: {} 版本: {}, 共 {} 张图像",
    args.model_name,
    args.model_version,
    args.image_urls.len()
  );

  let results = std::thread::scope(|s| {
    let handles: Vec<_> = args
      .image_urls
      .iter()
      .map(|image_url| {
        let request = PredictRequest {
          model_name: args.model_name.clone(),
          model_version: args.model_version.clone(),
          image_url: image_url.clone(),
        };
        let task = &task;
        s.spawn(move || task.predict(&request))
      })
      .collect();
    handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
  });

  let mut failures = 0usize;
  for (image_url, result) in args.image_urls.iter().zip(results) {
    match result {
      Ok(Ok(response)) => println!("{}", serde_json::to_string(&response)?),
      Ok(Err(e)) => {
        failures += 1;
        error!("处理 {} 失败: {}", image_url, e);
        eprintln!("{} {}: {}", e.status_code(), image_url, e);
      }
      Err(_) => {
        failures += 1;
        error!("处理 {} 的线程异常退出", image_url);
        eprintln!("500 {}: 处理线程异常退出", image_url);
      }
    }
  }

  if task.nms().fallback_count() > 0 {
    info!("NMS 退回次数: {}", task.nms().fallback_count());
  }

  if failures > 0 {
    anyhow::bail!("{} / {} 个请求失败", failures, args.image_urls.len());
  }
  Ok(())
}
