//! 错误类型

use std::path::PathBuf;

use thiserror::Error;

/// 检测流程中的错误
///
/// 配置类错误 (`MissingModel` / `MissingSource` / `ModelNotFound` / `InvalidConfidence`)
/// 在任何检测开始前被拒绝; 资源打开错误由 `Detector` 直接抛给调用方,
/// 在调度边界 (`dispatch`) 统一转换为 `error: <message>` 状态。
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("请选择模型文件")]
    MissingModel,

    #[error("请选择输入源或使用摄像头")]
    MissingSource,

    #[error("模型文件不存在: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("模型加载失败: {p}: {reason}", p = .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("置信度阈值必须在 (0, 1] 范围内: {0}")]
    InvalidConfidence(f32),

    #[error("无法读取图片: {}", .0.display())]
    ImageRead(PathBuf),

    #[error("无法打开视频: {p} ({reason})", p = .path.display())]
    VideoOpen { path: PathBuf, reason: String },

    #[error("无法打开摄像头 {index} ({reason})")]
    CameraOpen { index: usize, reason: String },

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("结果输出失败: {0}")]
    Output(String),

    #[error("检测正在进行中")]
    Busy,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// 是否为配置类错误 (在启动检测前即可判定)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DetectError::MissingModel
                | DetectError::MissingSource
                | DetectError::ModelNotFound(_)
                | DetectError::InvalidConfidence(_)
        )
    }
}

pub type Result<T, E = DetectError> = std::result::Result<T, E>;
