//! 检测器 (Detector)
//! 职责: 持有已加载的模型 → 图片/视频/摄像头检测 → 标注输出 → 写入检测日志

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, RgbImage};

use super::types::{DetectionResult, SourceKind};
use crate::annotate::{self, Annotator};
use crate::error::{DetectError, Result};
use crate::input::{FrameObserver, FrameSink, FrameSource, VideoBackend};
use crate::models::{Model, ModelLoader};
use crate::result_log::{self, LogSink};
use crate::worker::CancelToken;

/// 检测器输出选项
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// 标注结果输出目录
    pub output_dir: PathBuf,
    /// 是否保存标注后的图片/视频
    pub save_result: bool,
    /// 标签字体
    pub font: Option<PathBuf>,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            save_result: true,
            font: None,
        }
    }
}

pub struct Detector {
    model: Box<dyn Model>,
    model_path: PathBuf,
    log: Arc<dyn LogSink>,
    video: Arc<dyn VideoBackend>,
    annotator: Annotator,
    options: DetectorOptions,
}

impl Detector {
    /// 加载模型并构造检测器
    pub fn load(
        loader: &dyn ModelLoader,
        model_path: &Path,
        log: Arc<dyn LogSink>,
        video: Arc<dyn VideoBackend>,
        options: DetectorOptions,
    ) -> Result<Self> {
        if !model_path.exists() {
            return Err(DetectError::ModelNotFound(model_path.to_path_buf()));
        }
        let t = Instant::now();
        let model = loader.load(model_path)?;
        log::info!(
            "✅ 模型已加载: {} ({} 类, {:?})",
            model_path.display(),
            model.names().len(),
            t.elapsed()
        );
        model.summary();
        Ok(Self::new(model, model_path, log, video, options))
    }

    pub fn new(
        model: Box<dyn Model>,
        model_path: &Path,
        log: Arc<dyn LogSink>,
        video: Arc<dyn VideoBackend>,
        options: DetectorOptions,
    ) -> Self {
        let annotator = Annotator::new(options.font.as_deref());
        Self {
            model,
            model_path: model_path.to_path_buf(),
            log,
            video,
            annotator,
            options,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// 图片检测: 逐目标写入日志
    pub fn detect_image(&mut self, path: &Path, conf: f32) -> Result<DetectionResult> {
        let image = image::open(path).map_err(|e| {
            log::debug!("图片解码失败 {}: {}", path.display(), e);
            DetectError::ImageRead(path.to_path_buf())
        })?;

        let t = Instant::now();
        let detections = self.model.forward(&image, conf)?;
        log::info!(
            "🔍 {}: {} 个目标 ({:?})",
            path.display(),
            detections.len(),
            t.elapsed()
        );

        let mut result = DetectionResult::image(path.display().to_string(), detections);

        if self.options.save_result {
            let mut canvas = image.to_rgb8();
            self.annotator.draw(&mut canvas, &result.detections);
            match annotate::result_path(&self.options.output_dir, path)
                .and_then(|out| annotate::save_image(&canvas, &out).map(|_| out))
            {
                Ok(out) => {
                    log::info!("💾 结果已保存: {}", out.display());
                    result.output_path = Some(out);
                }
                Err(e) => log::warn!("⚠️ 结果图片保存失败: {}", e),
            }
        }

        self.log_result(&result);
        Ok(result)
    }

    /// 视频检测: 逐帧检测, 只记录汇总
    pub fn detect_video(
        &mut self,
        path: &Path,
        conf: f32,
        cancel: &CancelToken,
        observer: &mut dyn FrameObserver,
    ) -> Result<DetectionResult> {
        let source = self.video.open_file(path)?;
        if let Some((w, h)) = source.dimensions() {
            log::info!("📹 {} ({}x{} @ {:.2} fps)", path.display(), w, h, source.fps());
        }

        let output = if self.options.save_result {
            match annotate::result_path(&self.options.output_dir, path) {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("⚠️ {}", e);
                    None
                }
            }
        } else {
            None
        };

        let (frames, total, written) =
            self.run_stream(source, conf, cancel, observer, output.as_deref())?;

        let mut result = DetectionResult::stream(
            SourceKind::Video,
            path.display().to_string(),
            frames,
            total,
        );
        result.output_path = written;
        self.log_result(&result);
        Ok(result)
    }

    /// 摄像头检测: 与视频相同, 但不写输出视频
    pub fn detect_camera(
        &mut self,
        index: usize,
        conf: f32,
        cancel: &CancelToken,
        observer: &mut dyn FrameObserver,
    ) -> Result<DetectionResult> {
        let source = self.video.open_camera(index)?;
        let (frames, total, _) = self.run_stream(source, conf, cancel, observer, None)?;

        let result = DetectionResult::stream(
            SourceKind::Camera,
            format!("camera_{}", index),
            frames,
            total,
        );
        self.log_result(&result);
        Ok(result)
    }

    /// 帧循环, 返回 (帧数, 目标总数, 输出视频路径)
    ///
    /// 每帧开始前检查一次取消标记。中途出错时先关闭结果视频 (保留已写入的帧) 再返回错误。
    fn run_stream(
        &mut self,
        mut source: Box<dyn FrameSource>,
        conf: f32,
        cancel: &CancelToken,
        observer: &mut dyn FrameObserver,
        output: Option<&Path>,
    ) -> Result<(u64, u64, Option<PathBuf>)> {
        let fps = source.fps();
        let mut writer: Option<Box<dyn FrameSink>> = None;
        let mut writer_failed = output.is_none();
        let mut frames: u64 = 0;
        let mut total: u64 = 0;
        let mut failure = None;
        let t = Instant::now();

        loop {
            if cancel.is_cancelled() {
                log::info!("🛑 检测已取消, 已处理 {} 帧", frames);
                break;
            }
            let frame = match source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let image = DynamicImage::ImageRgb8(frame);
            let detections = match self.model.forward(&image, conf) {
                Ok(detections) => detections,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            frames += 1;
            total += detections.len() as u64;

            let mut canvas: RgbImage = image.into_rgb8();
            self.annotator.draw(&mut canvas, &detections);

            if !writer_failed {
                if writer.is_none() {
                    if let Some(out) = output {
                        let (w, h) = canvas.dimensions();
                        match self.video.create_writer(out, w, h, fps) {
                            Ok(sink) => writer = Some(sink),
                            Err(e) => {
                                log::warn!("⚠️ 无法创建结果视频 {}: {}", out.display(), e);
                                writer_failed = true;
                            }
                        }
                    }
                }
                if let Some(sink) = writer.as_mut() {
                    if let Err(e) = sink.write(&canvas) {
                        log::warn!("⚠️ 结果视频写入失败, 停止写入: {}", e);
                        writer = None;
                        writer_failed = true;
                    }
                }
            }

            observer.on_frame(&canvas, &detections);
        }
        drop(source);

        let elapsed = t.elapsed().as_secs_f64();
        if frames > 0 && elapsed > 0.0 {
            log::info!(
                "📊 {} 帧, {} 个目标, 平均 {:.1} fps",
                frames,
                total,
                frames as f64 / elapsed
            );
        }

        let mut written = None;
        if let Some(sink) = writer {
            match sink.finish() {
                Ok(()) => written = output.map(Path::to_path_buf),
                Err(e) => log::warn!("⚠️ 结果视频关闭失败: {}", e),
            }
        }

        if let Some(e) = failure {
            log::warn!("⚠️ 检测中断, 已处理 {} 帧", frames);
            return Err(e);
        }
        Ok((frames, total, written))
    }

    /// 写入检测结果块
    pub fn log_result(&self, result: &DetectionResult) {
        result_log::append(
            self.log.as_ref(),
            &result_log::format_detection_block(result),
        );
    }
}
