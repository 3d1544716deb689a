/// 视频文件解码器 + FFmpeg 后端
/// Video file decoder backed by ez-ffmpeg
use std::path::Path;

use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;

use super::decode_filter::{DecodeFilter, DecoderMsg, Delivery};
use super::{FrameSink, FrameSource, VideoBackend, DEFAULT_FPS};
use crate::error::{DetectError, Result};

/// 解码队列长度
const QUEUE_DEPTH: usize = 4;

/// ez-ffmpeg 实现的视频后端
#[derive(Debug, Default, Clone)]
pub struct FfmpegBackend {
    /// 结果视频编码器
    pub codec: Option<String>,
}

impl VideoBackend for FfmpegBackend {
    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let url = path.to_string_lossy().into_owned();
        let (fps, dims) = probe(&url);
        let mut source = FfmpegSource::start(Input::new(url.as_str()), Delivery::Blocking, fps)
            .map_err(|reason| DetectError::VideoOpen {
                path: path.to_path_buf(),
                reason,
            })?;
        source.dims = dims;
        log::info!("📹 视频已打开: {} ({:.2} fps, {:?})", url, fps, dims);
        Ok(Box::new(source))
    }

    fn open_camera(&self, index: usize) -> Result<Box<dyn FrameSource>> {
        let source = super::camera::open_camera(index)?;
        Ok(Box::new(source))
    }

    fn create_writer(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameSink>> {
        let codec = self.codec.as_deref().unwrap_or(super::encoder::DEFAULT_CODEC);
        let writer = super::encoder::FfmpegWriter::start(path, width, height, fps, codec)?;
        Ok(Box::new(writer))
    }
}

/// 读取视频帧率和尺寸, 帧率读取失败时回退到默认值
pub fn probe(url: &str) -> (f64, Option<(u32, u32)>) {
    match find_video_stream_info(url) {
        Ok(Some(StreamInfo::Video {
            fps, width, height, ..
        })) => {
            let fps = if fps.is_finite() && fps > 0.0 {
                fps
            } else {
                DEFAULT_FPS
            };
            let dims = (width > 0 && height > 0).then_some((width as u32, height as u32));
            (fps, dims)
        }
        Ok(_) => (DEFAULT_FPS, None),
        Err(e) => {
            log::warn!("⚠️ 无法读取视频信息 {}: {}, 使用 {} fps", url, e, DEFAULT_FPS);
            (DEFAULT_FPS, None)
        }
    }
}

/// 基于 FFmpeg 解码线程的帧来源
pub struct FfmpegSource {
    rx: Option<Receiver<DecoderMsg>>,
    fps: f64,
    dims: Option<(u32, u32)>,
    finished: bool,
}

impl FfmpegSource {
    /// 构建并启动解码, 帧通过有界通道交给调用方
    pub fn start(input: Input, delivery: Delivery, fps: f64) -> std::result::Result<Self, String> {
        let (tx, rx) = bounded(QUEUE_DEPTH);

        let filter = DecodeFilter::new(tx.clone(), delivery);
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=rgb24")
            .output(out)
            .build()
            .map_err(|e| format!("构建失败: {}", e))?;

        let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;

        // 等待解码结束后发送结束标记, 保证在所有帧之后到达
        std::thread::Builder::new()
            .name("ffmpeg-wait".into())
            .spawn(move || {
                let end = sch.wait().err().map(|e| e.to_string());
                let _ = tx.send(DecoderMsg::End(end));
            })
            .map_err(|e| format!("无法启动解码线程: {}", e))?;

        Ok(Self {
            rx: Some(rx),
            fps,
            dims: None,
            finished: false,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(DecoderMsg::Frame(frame)) => Ok(Some(frame)),
            Ok(DecoderMsg::End(err)) => {
                self.finished = true;
                if let Some(e) = err {
                    log::warn!("⚠️ 解码提前结束: {}", e);
                }
                Ok(None)
            }
            Err(_) => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.dims
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // 关闭接收端, 解码线程下一次发送失败后退出
        self.rx.take();
    }
}
