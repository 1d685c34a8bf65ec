// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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
  panic::{AssertUnwindSafe, catch_unwind},
  sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Candidate, DetectResult};

/// 抑制范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsScope {
  /// 所有类别一起做抑制，高分框可以抑制其它类别的重叠框
  #[default]
  Global,
  /// 仅在同类别之间抑制
  PerClass,
}

impl std::str::FromStr for NmsScope {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "global" => Ok(NmsScope::Global),
      "per-class" | "per_class" | "class" => Ok(NmsScope::PerClass),
      other => Err(format!("未知的 NMS 范围: {}", other)),
    }
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum NmsError {
  #[error("第 {row} 行候选框包含非有限值")]
  NonFinite { row: usize },
  #[error("IoU 阈值 {0} 不在 (0, 1] 区间内")]
  InvalidThreshold(f32),
}

/// NMS 策略，返回保留下来的候选框下标（按选择顺序）
pub trait Suppressor: Send + Sync {
  fn suppress(
    &self,
    candidates: &[Candidate],
    iou_threshold: f32,
    scope: NmsScope,
  ) -> Result<Vec<usize>, NmsError>;
}

/// 贪心 NMS
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyNms;

impl Suppressor for GreedyNms {
  fn suppress(
    &self,
    candidates: &[Candidate],
    iou_threshold: f32,
    scope: NmsScope,
  ) -> Result<Vec<usize>, NmsError> {
    if !(iou_threshold > 0.0 && iou_threshold <= 1.0) {
      return Err(NmsError::InvalidThreshold(iou_threshold));
    }
    if let Some(bad) = candidates
      .iter()
      .find(|c| !c.score.is_finite() || !c.bbox.is_finite())
    {
      return Err(NmsError::NonFinite { row: bad.row });
    }

    // 稳定排序：分数降序，同分按行号
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
      candidates[b]
        .score
        .total_cmp(&candidates[a].score)
        .then(candidates[a].row.cmp(&candidates[b].row))
    });

    let mut suppressed = vec![false; candidates.len()];
    let mut keep = Vec::new();

    for (pos, &i) in order.iter().enumerate() {
      if suppressed[i] {
        continue;
      }
      keep.push(i);
      let selected = &candidates[i];
      for &j in &order[pos + 1..] {
        if suppressed[j] {
          continue;
        }
        let other = &candidates[j];
        if scope == NmsScope::PerClass && other.class_id != selected.class_id {
          continue;
        }
        if selected.bbox.iou(&other.bbox) > iou_threshold {
          suppressed[j] = true;
        }
      }
    }

    Ok(keep)
  }
}

/// NMS 执行器
///
/// 策略失败（返回错误或 panic）时退回到未过滤的候选列表，并记录退回次数。
pub struct NmsEngine {
  suppressor: Box<dyn Suppressor>,
  scope: NmsScope,
  fallbacks: AtomicU64,
}

impl Default for NmsEngine {
  fn default() -> Self {
    Self::new(Box::new(GreedyNms), NmsScope::default())
  }
}

impl NmsEngine {
  pub fn new(suppressor: Box<dyn Suppressor>, scope: NmsScope) -> Self {
    Self {
      suppressor,
      scope,
      fallbacks: AtomicU64::new(0),
    }
  }

  pub fn with_scope(scope: NmsScope) -> Self {
    Self::new(Box::new(GreedyNms), scope)
  }

  pub fn scope(&self) -> NmsScope {
    self.scope
  }

  /// 累计退回次数
  pub fn fallback_count(&self) -> u64 {
    self.fallbacks.load(Ordering::Relaxed)
  }

  pub fn run(&self, candidates: Vec<Candidate>, iou_threshold: f32) -> DetectResult {
    if candidates.is_empty() {
      return DetectResult::default();
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
      self
        .suppressor
        .suppress(&candidates, iou_threshold, self.scope)
    }));

    let reason = match outcome {
      Ok(Ok(keep)) => {
        debug!("NMS 保留 {} / {} 个候选框", keep.len(), candidates.len());
        let items = keep.into_iter().map(|i| candidates[i]).collect();
        return DetectResult {
          items,
          nms_fallback: false,
        };
      }
      Ok(Err(e)) => e.to_string(),
      Err(_) => "NMS 策略发生 panic".to_string(),
    };

    let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(
      "NMS 处理失败, 返回未过滤的 {} 个候选框 (累计 {} 次): {}",
      candidates.len(),
      total,
      reason
    );
    DetectResult {
      items: candidates.into_boxed_slice(),
      nms_fallback: true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn candidate(row: usize, class_id: usize, score: f32, bbox: BBox) -> Candidate {
    Candidate {
      bbox,
      score,
      class_id,
      row,
    }
  }

  /// 与 a 的 IoU 为 0.7 的框：宽 100 高 100，水平偏移 d，满足 (100-d)/(100+d)=0.7
  fn overlapping_pair(class_b: usize) -> Vec<Candidate> {
    let d = 30.0 / 1.7;
    vec![
      candidate(0, 0, 0.6, BBox::new(d, 0.0, 100.0, 100.0)),
      candidate(1, class_b, 0.9, BBox::new(0.0, 0.0, 100.0, 100.0)),
    ]
  }

  #[test]
  fn keeps_only_the_stronger_overlapping_box() {
    let candidates = overlapping_pair(0);
    assert!((candidates[0].bbox.iou(&candidates[1].bbox) - 0.7).abs() < 1e-4);

    let result = NmsEngine::default().run(candidates, 0.5);
    assert_eq!(result.len(), 1);
    assert!((result.items[0].score - 0.9).abs() < 1e-6);
    assert!(!result.nms_fallback);
  }

  #[test]
  fn global_scope_suppresses_across_classes() {
    let global = NmsEngine::with_scope(NmsScope::Global).run(overlapping_pair(1), 0.5);
    assert_eq!(global.len(), 1);

    let per_class = NmsEngine::with_scope(NmsScope::PerClass).run(overlapping_pair(1), 0.5);
    assert_eq!(per_class.len(), 2);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    // IoU 恰好为 1/3
    let candidates = vec![
      candidate(0, 0, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0)),
      candidate(1, 0, 0.8, BBox::new(5.0, 0.0, 10.0, 10.0)),
    ];
    let iou = candidates[0].bbox.iou(&candidates[1].bbox);
    let result = NmsEngine::default().run(candidates, iou);
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn ties_are_broken_by_row_order() {
    let candidates = vec![
      candidate(0, 0, 0.8, BBox::new(0.0, 0.0, 10.0, 10.0)),
      candidate(1, 3, 0.8, BBox::new(0.0, 0.0, 10.0, 10.0)),
    ];
    let result = NmsEngine::default().run(candidates, 0.5);
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].row, 0);
  }

  #[test]
  fn zero_area_boxes_survive() {
    let candidates = vec![
      candidate(0, 0, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0)),
      candidate(1, 0, 0.8, BBox::new(2.0, 2.0, 0.0, 0.0)),
      candidate(2, 0, 0.95, BBox::new(3.0, 3.0, 0.0, 4.0)),
    ];
    let result = NmsEngine::default().run(candidates, 0.1);
    assert_eq!(result.len(), 3);
    assert_eq!(result.items[0].row, 2);
  }

  #[test]
  fn empty_input_is_empty_output() {
    let engine = NmsEngine::default();
    assert!(engine.run(Vec::new(), 0.5).is_empty());
    assert_eq!(engine.fallback_count(), 0);
  }

  #[test]
  fn non_finite_input_falls_back_to_unfiltered() {
    let engine = NmsEngine::default();
    let mut candidates = overlapping_pair(0);
    candidates[0].bbox.width = f32::INFINITY;
    let result = engine.run(candidates.clone(), 0.5);
    assert!(result.nms_fallback);
    assert_eq!(&*result.items, candidates.as_slice());
    assert_eq!(engine.fallback_count(), 1);
  }

  struct Panicking;

  impl Suppressor for Panicking {
    fn suppress(&self, _: &[Candidate], _: f32, _: NmsScope) -> Result<Vec<usize>, NmsError> {
      panic!("boom")
    }
  }

  #[test]
  fn panicking_strategy_falls_back() {
    let engine = NmsEngine::new(Box::new(Panicking), NmsScope::Global);
    let candidates = overlapping_pair(0);
    let result = engine.run(candidates.clone(), 0.5);
    assert!(result.nms_fallback);
    assert_eq!(result.len(), candidates.len());
    assert_eq!(engine.fallback_count(), 1);
  }

  #[test]
  fn retained_boxes_never_exceed_threshold() {
    let mut candidates = Vec::new();
    for i in 0..40usize {
      let offset = (i * 7 % 50) as f32;
      let size = 20.0 + (i % 5) as f32 * 6.0;
      let score = 0.5 + (i * 13 % 50) as f32 / 100.0;
      candidates.push(candidate(
        i,
        i % 3,
        score,
        BBox::new(offset, offset / 2.0, size, size),
      ));
    }
    let threshold = 0.45;
    let result = NmsEngine::default().run(candidates, threshold);
    for (i, a) in result.items.iter().enumerate() {
      for b in &result.items[i + 1..] {
        assert!(a.bbox.iou(&b.bbox) <= threshold);
      }
    }
  }

  #[test]
  fn scope_parses() {
    assert_eq!("global".parse::<NmsScope>(), Ok(NmsScope::Global));
    assert_eq!("per-class".parse::<NmsScope>(), Ok(NmsScope::PerClass));
    assert!("none".parse::<NmsScope>().is_err());
  }
}
