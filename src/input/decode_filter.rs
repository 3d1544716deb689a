/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;

/// 解码线程 → 检测线程的消息
pub enum DecoderMsg {
    Frame(RgbImage),
    /// 解码结束, 携带错误信息 (如有)
    End(Option<String>),
}

/// 丢帧策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 视频文件: 背压, 每一帧都交给检测线程
    Blocking,
    /// 摄像头: 检测跟不上时丢弃最新帧
    DropWhenFull,
}

/// FFmpeg解码过滤器: RGB24 帧 → RgbImage
#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<DecoderMsg>,
    delivery: Delivery,
    pub total_frames: usize,
    pub dropped_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecoderMsg>, delivery: Delivery) -> Self {
        Self {
            tx,
            delivery,
            total_frames: 0,
            dropped_frames: 0,
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::debug!("✅ 解码线程启动 ({:?})", self.delivery);
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        let image = unsafe {
            // 空帧或损坏帧
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as usize;
            let h = (*frame.as_ptr()).height as usize;
            let data = (*frame.as_ptr()).data[0];
            let stride = (*frame.as_ptr()).linesize[0] as usize;

            if w == 0 || h == 0 || data.is_null() || stride < w * 3 {
                self.dropped_frames += 1;
                return Ok(None);
            }

            // 按行拷贝, 去掉行尾填充
            let mut buf = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                let row = std::slice::from_raw_parts(data.add(y * stride), w * 3);
                buf.extend_from_slice(row);
            }
            RgbImage::from_raw(w as u32, h as u32, buf)
        };

        let Some(image) = image else {
            self.dropped_frames += 1;
            return Ok(None);
        };

        match self.delivery {
            Delivery::Blocking => {
                // 接收端已关闭 (检测被取消), 终止解码
                self.tx
                    .send(DecoderMsg::Frame(image))
                    .map_err(|_| "detector stopped".to_string())?;
            }
            Delivery::DropWhenFull => match self.tx.try_send(DecoderMsg::Frame(image)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.dropped_frames += 1,
                Err(TrySendError::Disconnected(_)) => return Err("detector stopped".to_string()),
            },
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        log::debug!(
            "📺 解码统计: 总帧{} | 丢弃{}",
            self.total_frames,
            self.dropped_frames
        );
    }
}
