/// 结果视频编码器
///
/// 原始 RGB24 帧通过读回调喂给 FFmpeg, 按源帧率和源尺寸编码输出。
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::{FfmpegContext, Input, Output};
use image::RgbImage;

use super::FrameSink;
use crate::error::{DetectError, Result};

pub const DEFAULT_CODEC: &str = "mpeg4";

/// libavutil AVERROR_EOF
const AVERROR_EOF: i32 = -541478725;

/// 读回调状态: 当前帧的剩余字节
struct RawReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl RawReader {
    fn read(&mut self, buf: &mut [u8]) -> i32 {
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return AVERROR_EOF,
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        n as i32
    }
}

/// yuv420p 要求宽高为偶数, 奇数边裁掉最后一行/列
pub fn encoded_size(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

pub struct FfmpegWriter {
    tx: Option<Sender<Vec<u8>>>,
    waiter: Option<JoinHandle<Option<String>>>,
    width: u32,
    height: u32,
    frames: u64,
}

impl FfmpegWriter {
    pub fn start(path: &Path, width: u32, height: u32, fps: f64, codec: &str) -> Result<Self> {
        let (tx, rx) = bounded::<Vec<u8>>(8);
        let mut reader = RawReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        };

        let video_size = format!("{}x{}", width, height);
        let framerate = format!("{:.3}", fps);
        let input = Input::new_by_read_callback(move |buf: &mut [u8]| reader.read(buf))
            .set_format("rawvideo")
            .set_input_opts(
                [
                    ("video_size", video_size.as_str()),
                    ("pixel_format", "rgb24"),
                    ("framerate", framerate.as_str()),
                ]
                .into(),
            );

        let url = path.to_string_lossy().into_owned();
        let output = Output::new(url.as_str()).set_video_codec(codec);

        let (out_w, out_h) = encoded_size(width, height);
        if (out_w, out_h) != (width, height) {
            log::warn!(
                "⚠️ 编码器要求偶数尺寸, 结果视频为 {}x{} (原始 {}x{})",
                out_w,
                out_h,
                width,
                height
            );
        }
        let filter = format!("crop={}:{}:0:0,format=yuv420p", out_w, out_h);

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc(filter.as_str())
            .output(output)
            .build()
            .map_err(|e| DetectError::Output(format!("无法创建视频 {}: {}", url, e)))?;
        let sch = ctx
            .start()
            .map_err(|e| DetectError::Output(format!("无法启动编码 {}: {}", url, e)))?;

        let waiter = std::thread::Builder::new()
            .name("ffmpeg-encode".into())
            .spawn(move || sch.wait().err().map(|e| e.to_string()))?;

        log::info!(
            "🎞️ 结果视频: {} ({}x{} @ {:.2} fps, {})",
            url,
            width,
            height,
            fps,
            codec
        );

        Ok(Self {
            tx: Some(tx),
            waiter: Some(waiter),
            width,
            height,
            frames: 0,
        })
    }
}

impl FrameSink for FfmpegWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(DetectError::Output(format!(
                "帧尺寸 {:?} 与输出 {}x{} 不一致",
                frame.dimensions(),
                self.width,
                self.height
            )));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DetectError::Output("编码器已关闭".into()))?;
        tx.send(frame.as_raw().clone())
            .map_err(|_| DetectError::Output("编码线程已退出".into()))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // 关闭发送端, 读回调返回 EOF
        self.tx.take();
        let Some(waiter) = self.waiter.take() else {
            return Ok(());
        };
        match waiter.join() {
            Ok(None) => {
                log::debug!("🎞️ 编码完成, 共 {} 帧", self.frames);
                Ok(())
            }
            Ok(Some(e)) => Err(DetectError::Output(e)),
            Err(_) => Err(DetectError::Output("编码线程异常退出".into())),
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
    }
}
