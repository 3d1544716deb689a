//! 输入源分类与检测调度
//!
//! `Controller` 按输入源类型选择检测方式, 并保证每次调度恰好写入一个开始标记和一个结束标记。
//! 检测器在首次使用或模型路径变化时重建, 其余情况下跨调度复用。

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use image::RgbImage;

use crate::detection::types::{
    Detection, DetectionRequest, DetectionResult, SourceKind, CAMERA_TOKEN,
};
use crate::detection::{Detector, DetectorOptions};
use crate::error::{DetectError, Result};
use crate::input::{FrameObserver, VideoBackend};
use crate::models::ModelLoader;
use crate::result_log::{self, LogSink};
use crate::worker::CancelToken;

pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

/// 输入源分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceClass {
    Camera,
    Image(PathBuf),
    Video(PathBuf),
    /// 文件存在但扩展名不支持
    Unsupported(PathBuf),
    /// 文件不存在
    NotFound(PathBuf),
}

impl SourceClass {
    pub fn kind(&self) -> Option<SourceKind> {
        match self {
            SourceClass::Camera => Some(SourceKind::Camera),
            SourceClass::Image(_) => Some(SourceKind::Image),
            SourceClass::Video(_) => Some(SourceKind::Video),
            SourceClass::Unsupported(_) | SourceClass::NotFound(_) => None,
        }
    }
}

/// 按顺序判定: 摄像头标记 → 不是文件 → 图片扩展名 → 视频扩展名 → 不支持
///
/// 目录按不存在处理。
pub fn classify_source(source: &str) -> SourceClass {
    if source.trim().eq_ignore_ascii_case(CAMERA_TOKEN) {
        return SourceClass::Camera;
    }

    let path = PathBuf::from(source);
    if !path.is_file() {
        return SourceClass::NotFound(path);
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        SourceClass::Image(path)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        SourceClass::Video(path)
    } else {
        SourceClass::Unsupported(path)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 一次调度的结果
#[derive(Debug)]
pub enum Outcome {
    Completed(DetectionResult),
    UnsupportedFormat,
    SourceNotExist,
    Error {
        kind: Option<SourceKind>,
        message: String,
    },
}

impl Outcome {
    /// 结束标记中的状态字段
    pub fn status(&self) -> String {
        match self {
            Outcome::Completed(_) => "completed".to_string(),
            Outcome::UnsupportedFormat => "unsupported_format".to_string(),
            Outcome::SourceNotExist => "source_not_exist".to_string(),
            Outcome::Error { message, .. } => format!("error: {}", message),
        }
    }

    pub fn kind(&self) -> Option<SourceKind> {
        match self {
            Outcome::Completed(result) => Some(result.source_kind),
            Outcome::Error { kind, .. } => *kind,
            Outcome::UnsupportedFormat | Outcome::SourceNotExist => None,
        }
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            Outcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

/// 调度过程中的状态消息与逐帧回调
pub trait DispatchListener {
    fn status(&mut self, message: &str);

    fn frame(&mut self, _annotated: &RgbImage, _detections: &[Detection]) {}
}

/// 只写 `log` 的监听器
pub struct LogListener;

impl DispatchListener for LogListener {
    fn status(&mut self, message: &str) {
        log::info!("{}", message);
    }
}

struct Frames<'a>(&'a mut dyn DispatchListener);

impl FrameObserver for Frames<'_> {
    fn on_frame(&mut self, annotated: &RgbImage, detections: &[Detection]) {
        self.0.frame(annotated, detections);
    }
}

pub struct Controller {
    loader: Box<dyn ModelLoader>,
    log: Arc<dyn LogSink>,
    video: Arc<dyn VideoBackend>,
    options: DetectorOptions,
    camera_index: usize,
    detector: Option<Detector>,
}

impl Controller {
    pub fn new(
        loader: Box<dyn ModelLoader>,
        log: Arc<dyn LogSink>,
        video: Arc<dyn VideoBackend>,
        options: DetectorOptions,
    ) -> Self {
        Self {
            loader,
            log,
            video,
            options,
            camera_index: 0,
            detector: None,
        }
    }

    pub fn with_camera_index(mut self, index: usize) -> Self {
        self.camera_index = index;
        self
    }

    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    /// 当前已加载的模型路径
    pub fn loaded_model(&self) -> Option<&Path> {
        self.detector.as_ref().map(|d| d.model_path())
    }

    /// 丢弃已加载的检测器, 下次调度时重新加载
    pub fn reset(&mut self) {
        self.detector = None;
    }

    /// 返回与 `model_path` 对应的检测器, 路径变化时重建
    pub fn ensure_detector(
        &mut self,
        model_path: &Path,
        listener: &mut dyn DispatchListener,
    ) -> Result<&mut Detector> {
        if self.loaded_model() != Some(model_path) {
            self.detector = None;
            listener.status("正在加载模型...");
            let detector = Detector::load(
                self.loader.as_ref(),
                model_path,
                Arc::clone(&self.log),
                Arc::clone(&self.video),
                self.options.clone(),
            )?;
            listener.status("模型加载完成");
            self.detector = Some(detector);
        }
        self.detector
            .as_mut()
            .ok_or_else(|| DetectError::ModelNotFound(model_path.to_path_buf()))
    }

    /// 执行一次检测调度
    ///
    /// 检测器抛出的错误在这里转换为 `error: <message>` 状态, 不会向上传播。
    pub fn dispatch(
        &mut self,
        request: &DetectionRequest,
        cancel: &CancelToken,
        listener: &mut dyn DispatchListener,
    ) -> Outcome {
        let conf = request.confidence();
        result_log::append(
            self.log.as_ref(),
            &result_log::format_start_marker(&Local::now(), request.source(), conf),
        );
        listener.status(&format!("开始检测: {}", request.source()));
        listener.status(&format!("置信度阈值: {:.2}", conf));

        let class = classify_source(request.source());
        let outcome = match &class {
            SourceClass::Unsupported(path) => {
                log::warn!("不支持的文件格式: {}", path.display());
                listener.status("不支持的文件格式");
                Outcome::UnsupportedFormat
            }
            SourceClass::NotFound(path) => {
                log::warn!("输入源不存在: {}", path.display());
                listener.status("输入源不存在");
                Outcome::SourceNotExist
            }
            _ => match self.run_guarded(&class, request, cancel, listener) {
                Ok(result) => Outcome::Completed(result),
                Err(e) => {
                    log::error!("❌ 检测出错: {}", e);
                    listener.status(&format!("检测出错: {}", e));
                    Outcome::Error {
                        kind: class.kind(),
                        message: e.to_string(),
                    }
                }
            },
        };

        result_log::append(
            self.log.as_ref(),
            &result_log::format_end_marker(&Local::now(), outcome.kind(), &outcome.status()),
        );
        outcome
    }

    /// 检测过程中的 panic 同样转换为错误, 结束标记照常写入
    fn run_guarded(
        &mut self,
        class: &SourceClass,
        request: &DetectionRequest,
        cancel: &CancelToken,
        listener: &mut dyn DispatchListener,
    ) -> Result<DetectionResult> {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run(class, request, cancel, listener)
        }));
        match result {
            Ok(result) => result,
            Err(payload) => {
                // 检测器状态不可信, 下次调度重新加载
                self.detector = None;
                Err(DetectError::Inference(format!(
                    "检测异常退出: {}",
                    panic_message(payload.as_ref())
                )))
            }
        }
    }

    fn run(
        &mut self,
        class: &SourceClass,
        request: &DetectionRequest,
        cancel: &CancelToken,
        listener: &mut dyn DispatchListener,
    ) -> Result<DetectionResult> {
        let conf = request.confidence();
        let camera_index = self.camera_index;
        let detector = self.ensure_detector(request.model_path(), listener)?;

        match class {
            SourceClass::Image(path) => {
                listener.status("正在进行图片检测...");
                let result = detector.detect_image(path, conf)?;
                listener.status("图片检测完成");
                Ok(result)
            }
            SourceClass::Video(path) => {
                listener.status("正在进行视频检测...");
                let result = detector.detect_video(path, conf, cancel, &mut Frames(listener))?;
                if let Some(summary) = result.summary() {
                    listener.status(&summary);
                }
                listener.status("视频检测完成");
                Ok(result)
            }
            SourceClass::Camera => {
                listener.status("启动摄像头检测，点击“停止检测”退出");
                let result =
                    detector.detect_camera(camera_index, conf, cancel, &mut Frames(listener))?;
                if let Some(summary) = result.summary() {
                    listener.status(&summary);
                }
                Ok(result)
            }
            SourceClass::Unsupported(_) | SourceClass::NotFound(_) => {
                Err(DetectError::MissingSource)
            }
        }
    }
}
