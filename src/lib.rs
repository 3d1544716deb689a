// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 检测框与标签绘制
pub mod config; // 命令行参数与配置文件
pub mod detection; // 检测器 + 数据结构
pub mod dispatch; // 输入源分类与调度
pub mod error; // 错误类型
pub mod input; // 视频/摄像头输入与结果视频输出
pub mod models; // 模型接口与具体实现
pub mod result_log; // out.txt 检测日志
pub mod worker; // 后台检测会话 + 取消

#[cfg(feature = "onnx")]
pub mod ort_backend;
#[cfg(feature = "gui")]
pub mod renderer; // macroquad + egui 桌面界面

pub use crate::config::{Args, DetectorConfig};
pub use crate::detection::types::{
    BBox, Detection, DetectionRequest, DetectionResult, SourceKind,
};
pub use crate::detection::Detector;
pub use crate::dispatch::{classify_source, Controller, Outcome, SourceClass};
pub use crate::error::{DetectError, Result};
pub use crate::models::{Model, ModelLoader};
#[cfg(feature = "onnx")]
pub use crate::models::{OnnxModelLoader, YOLOv8};
#[cfg(feature = "onnx")]
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};
pub use crate::worker::{CancelToken, DetectionSession, WorkerEvent};

/// 非极大值抑制
///
/// 按置信度降序排序后, 丢弃与已保留框 IoU 大于阈值的框。
pub fn non_max_suppression(xs: &mut Vec<(BBox, usize, f32)>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.2.total_cmp(&b1.2));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 初始化 env_logger, `RUST_LOG` 优先
pub fn init_logging(default_filter: log::LevelFilter) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.format_timestamp_millis();

    if builder.try_init().is_err() {
        // 已初始化
    }
}
