/// 检测系统数据结构定义
/// Data structures for the detection system
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::error::{DetectError, Result};

// ========== 公共常量 ==========

/// 默认置信度阈值
pub const DEFAULT_CONF: f32 = 0.30;

/// 摄像头输入源标记
pub const CAMERA_TOKEN: &str = "camera";

// ========== 枚举类型 ==========

/// 输入源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Video,
    Camera,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::Video => "video",
            SourceKind::Camera => "camera",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== 数据结构 ==========

/// 检测框 (像素坐标, x1<=x2, y1<=y2)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// 从任意两个角点构造, 保证 x1<=x2, y1<=y2
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let inter = self.intersection_area(another);
        let union = self.area() + another.area() - inter;
        if union <= 0. {
            0.
        } else {
            inter / union
        }
    }
}

/// 单个检测目标 (模型输出, 创建后不再修改)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// 一次检测任务的结果 (一张图片, 或一次视频/摄像头会话)
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub source_kind: SourceKind,
    pub source_path: String,
    pub timestamp: DateTime<Local>,
    /// 图片检测的逐目标结果; 视频/摄像头只做汇总, 此处为空
    pub detections: Vec<Detection>,
    /// 已处理帧数 (仅视频/摄像头)
    pub frames_processed: Option<u64>,
    /// 检测到的目标总数
    pub total_detections: u64,
    /// 标注结果输出路径
    pub output_path: Option<PathBuf>,
}

impl DetectionResult {
    pub fn image(source_path: String, detections: Vec<Detection>) -> Self {
        let total = detections.len() as u64;
        Self {
            source_kind: SourceKind::Image,
            source_path,
            timestamp: Local::now(),
            detections,
            frames_processed: None,
            total_detections: total,
            output_path: None,
        }
    }

    pub fn stream(
        source_kind: SourceKind,
        source_path: String,
        frames_processed: u64,
        total_detections: u64,
    ) -> Self {
        Self {
            source_kind,
            source_path,
            timestamp: Local::now(),
            detections: Vec::new(),
            frames_processed: Some(frames_processed),
            total_detections,
            output_path: None,
        }
    }

    /// 视频/摄像头的汇总信息
    pub fn summary(&self) -> Option<String> {
        let frames = self.frames_processed?;
        Some(match self.source_kind {
            SourceKind::Camera => format!(
                "摄像头检测总共处理了 {} 帧，检测到 {} 个目标",
                frames, self.total_detections
            ),
            _ => format!(
                "视频 {} 总共处理了 {} 帧，检测到 {} 个目标",
                self.source_path, frames, self.total_detections
            ),
        })
    }
}

/// 检测请求 (每次调度新建, 调度开始后不可变)
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRequest {
    model_path: PathBuf,
    source: String,
    confidence: f32,
}

impl DetectionRequest {
    /// 校验并构造请求
    ///
    /// 模型路径必须存在; 置信度必须是 (0, 1] 内的有限值。
    pub fn new(
        model_path: impl Into<PathBuf>,
        source: impl Into<String>,
        confidence: f32,
    ) -> Result<Self> {
        let model_path = model_path.into();
        let source = source.into();

        if model_path.as_os_str().is_empty() {
            return Err(DetectError::MissingModel);
        }
        if source.trim().is_empty() {
            return Err(DetectError::MissingSource);
        }
        if !model_path.exists() {
            return Err(DetectError::ModelNotFound(model_path));
        }
        validate_confidence(confidence)?;

        Ok(Self {
            model_path,
            source,
            confidence,
        })
    }

    pub fn model_path(&self) -> &PathBuf {
        &self.model_path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// 置信度阈值校验: 有限值且位于 (0, 1]
pub fn validate_confidence(conf: f32) -> Result<f32> {
    if conf.is_finite() && conf > 0.0 && conf <= 1.0 {
        Ok(conf)
    } else {
        Err(DetectError::InvalidConfidence(conf))
    }
}
