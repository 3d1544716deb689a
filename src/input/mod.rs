/// 视频输入系统 (Video Input System)
///
/// 检测器只依赖这里的接口, 具体解码/编码由 `VideoBackend` 提供:
/// - FrameSource: 逐帧读取 (视频文件 / 摄像头)
/// - FrameSink:   标注后视频写出
/// - FfmpegBackend (`ffmpeg` feature): ez-ffmpeg 解码 + 编码
/// - UnavailableBackend: 未编译视频支持时, 打开任何视频都返回错误
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;

use crate::detection::types::Detection;
use crate::error::{DetectError, Result};

#[cfg(feature = "ffmpeg")]
pub mod camera;
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod encoder;

#[cfg(feature = "ffmpeg")]
pub use camera::get_camera_devices;
#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegBackend;

/// 无法读取源帧率时的默认值
pub const DEFAULT_FPS: f64 = 30.0;

/// 帧来源
pub trait FrameSource: Send {
    /// 读取下一帧, 流结束返回 `None`
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// 源帧率
    fn fps(&self) -> f64 {
        DEFAULT_FPS
    }

    /// 源尺寸 (宽, 高), 未知时为 `None`
    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }
}

/// 标注视频输出
pub trait FrameSink: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// 刷新并关闭输出文件
    fn finish(self: Box<Self>) -> Result<()>;
}

/// 视频后端
pub trait VideoBackend: Send + Sync {
    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>>;

    fn create_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>>;
}

/// 逐帧回调 (实时预览)
pub trait FrameObserver {
    fn on_frame(&mut self, annotated: &RgbImage, detections: &[Detection]);
}

/// 不需要预览时使用
pub struct NoPreview;

impl FrameObserver for NoPreview {
    fn on_frame(&mut self, _annotated: &RgbImage, _detections: &[Detection]) {}
}

impl<F> FrameObserver for F
where
    F: FnMut(&RgbImage, &[Detection]),
{
    fn on_frame(&mut self, annotated: &RgbImage, detections: &[Detection]) {
        self(annotated, detections)
    }
}

/// 未启用视频支持时的后端
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

const UNAVAILABLE: &str = "未启用视频支持 (需要 `ffmpeg` feature)";

impl VideoBackend for UnavailableBackend {
    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Err(DetectError::VideoOpen {
            path: path.to_path_buf(),
            reason: UNAVAILABLE.into(),
        })
    }

    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>> {
        Err(DetectError::CameraOpen {
            index,
            reason: UNAVAILABLE.into(),
        })
    }

    fn create_writer(&self, _: &Path, _: u32, _: u32, _: f64) -> Result<Box<dyn FrameSink>> {
        Err(DetectError::Output(UNAVAILABLE.into()))
    }
}

/// 当前编译配置下的默认后端
pub fn default_backend() -> Arc<dyn VideoBackend> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(FfmpegBackend::default())
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(UnavailableBackend)
    }
}
