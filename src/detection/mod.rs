/// 检测系统 (Detection System)
///
/// - types:    请求 / 结果 / 检测框等数据结构
/// - Detector: 持有模型, 执行图片/视频/摄像头检测
pub mod detector;
pub mod types;

pub use detector::{Detector, DetectorOptions};
