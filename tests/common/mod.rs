//! 集成测试用的替身: 脚本化模型 + 合成视频后端
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use yolov8_detector::detection::DetectorOptions;
use yolov8_detector::input::{FrameSink, FrameSource, VideoBackend};
use yolov8_detector::result_log::MemoryLog;
use yolov8_detector::{
    BBox, CancelToken, Controller, DetectError, Detection, Model, ModelLoader, Result,
};

pub const FRAME_W: u32 = 32;
pub const FRAME_H: u32 = 24;

pub fn det(name: &str, conf: f32, bbox: BBox) -> Detection {
    Detection {
        class_id: 0,
        class_name: name.to_string(),
        confidence: conf,
        bbox,
    }
}

/// 每次推理都返回同一组目标, 并按阈值过滤
pub struct ScriptedModel {
    pub detections: Vec<Detection>,
    pub names: Vec<String>,
    /// 成功推理这么多次后开始失败
    pub fail_after: Option<usize>,
    /// 失败时 panic 而不是返回错误
    pub panic: bool,
    pub calls: usize,
}

impl ScriptedModel {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            names: vec!["person".into()],
            fail_after: None,
            panic: false,
            calls: 0,
        }
    }
}

impl Model for ScriptedModel {
    fn forward(&mut self, _image: &DynamicImage, conf: f32) -> Result<Vec<Detection>> {
        self.calls += 1;
        if self.fail_after.is_some_and(|n| self.calls > n) {
            if self.panic {
                panic!("scripted panic on call {}", self.calls);
            }
            return Err(DetectError::Inference("scripted failure".into()));
        }
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= conf)
            .cloned()
            .collect())
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

/// 返回一个记录加载次数的模型加载器
pub fn scripted_loader(
    detections: Vec<Detection>,
    loads: Arc<AtomicUsize>,
) -> Box<dyn ModelLoader> {
    Box::new(move |_path: &Path| -> Result<Box<dyn Model>> {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel::new(detections.clone())) as Box<dyn Model>)
    })
}

/// 第一次推理就失败
pub fn failing_loader() -> Box<dyn ModelLoader> {
    failing_after_loader(vec![], 0)
}

/// 前 `n` 次推理成功, 之后返回错误
pub fn failing_after_loader(detections: Vec<Detection>, n: usize) -> Box<dyn ModelLoader> {
    Box::new(move |_path: &Path| -> Result<Box<dyn Model>> {
        let mut model = ScriptedModel::new(detections.clone());
        model.fail_after = Some(n);
        Ok(Box::new(model) as Box<dyn Model>)
    })
}

/// 前 `n` 次推理成功, 之后 panic
pub fn panicking_loader(n: usize) -> Box<dyn ModelLoader> {
    Box::new(move |_path: &Path| -> Result<Box<dyn Model>> {
        let mut model = ScriptedModel::new(vec![]);
        model.fail_after = Some(n);
        model.panic = true;
        Ok(Box::new(model) as Box<dyn Model>)
    })
}

/// 合成帧源
pub struct SyntheticSource {
    remaining: Option<usize>,
    produced: usize,
    /// 产出这么多帧后触发取消
    cancel_after: Option<(usize, CancelToken)>,
    delay: Option<Duration>,
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.produced += 1;
        if let Some((n, token)) = &self.cancel_after {
            if self.produced >= *n {
                token.cancel();
            }
        }
        Ok(Some(RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb([40, 80, 120]))))
    }

    fn fps(&self) -> f64 {
        25.0
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((FRAME_W, FRAME_H))
    }
}

/// 记录写出的帧
#[derive(Default)]
pub struct Written {
    pub frames: usize,
    pub finished: bool,
    pub size: Option<(u32, u32, f64)>,
}

pub struct RecordingSink {
    written: Arc<Mutex<Written>>,
}

impl FrameSink for RecordingSink {
    fn write(&mut self, _frame: &RgbImage) -> Result<()> {
        if let Ok(mut w) = self.written.lock() {
            w.frames += 1;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        if let Ok(mut w) = self.written.lock() {
            w.finished = true;
        }
        Ok(())
    }
}

/// 合成视频后端: 视频文件固定帧数, 摄像头无限帧
#[derive(Clone, Default)]
pub struct SyntheticBackend {
    pub video_frames: usize,
    pub camera_available: bool,
    pub camera_delay: Option<Duration>,
    /// 第 N 帧后自动取消 (摄像头)
    pub cancel_after: Option<(usize, CancelToken)>,
    pub written: Arc<Mutex<Written>>,
}

impl VideoBackend for SyntheticBackend {
    fn open_file(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(SyntheticSource {
            remaining: Some(self.video_frames),
            produced: 0,
            cancel_after: None,
            delay: None,
        }))
    }

    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>> {
        if !self.camera_available {
            return Err(DetectError::CameraOpen {
                index,
                reason: "no device".into(),
            });
        }
        Ok(Box::new(SyntheticSource {
            remaining: None,
            produced: 0,
            cancel_after: self.cancel_after.clone(),
            delay: self.camera_delay,
        }))
    }

    fn create_writer(
        &self,
        _path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>> {
        if let Ok(mut w) = self.written.lock() {
            w.size = Some((width, height, fps));
        }
        Ok(Box::new(RecordingSink {
            written: Arc::clone(&self.written),
        }))
    }
}

/// 测试工作目录: 模型文件 + 输出目录
pub struct Fixture {
    pub dir: TempDir,
    pub model: PathBuf,
    pub log: Arc<MemoryLog>,
    pub loads: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("yolov8n.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        Self {
            dir,
            model,
            log: Arc::new(MemoryLog::new()),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// 写一张测试图片
    pub fn image(&self, name: &str) -> PathBuf {
        let p = self.path(name);
        RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb([200, 200, 200]))
            .save(&p)
            .unwrap();
        p
    }

    /// 只需存在即可, 内容由合成后端提供
    pub fn video(&self, name: &str) -> PathBuf {
        let p = self.path(name);
        std::fs::write(&p, b"not really a video").unwrap();
        p
    }

    pub fn options(&self) -> DetectorOptions {
        DetectorOptions {
            output_dir: self.dir.path().join("results"),
            save_result: true,
            font: None,
        }
    }

    pub fn controller(&self, detections: Vec<Detection>, backend: SyntheticBackend) -> Controller {
        self.controller_with(scripted_loader(detections, Arc::clone(&self.loads)), backend)
    }

    pub fn controller_with(
        &self,
        loader: Box<dyn ModelLoader>,
        backend: SyntheticBackend,
    ) -> Controller {
        Controller::new(loader, self.log.clone(), Arc::new(backend), self.options())
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn log_text(&self) -> String {
        self.log.contents()
    }
}

pub fn end_markers(text: &str) -> usize {
    text.matches("] 检测结束\n").count()
}

pub fn start_markers(text: &str) -> usize {
    text.matches("] 开始检测\n").count()
}
