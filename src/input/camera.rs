//! 摄像头输入模块
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use ez_ffmpeg::Input;

use super::decode_filter::Delivery;
use super::decoder::FfmpegSource;
use super::DEFAULT_FPS;
use crate::error::{DetectError, Result};

const MAX_RETRIES: usize = 3;

/// 平台对应的采集格式
fn capture_format() -> &'static str {
    #[cfg(target_os = "windows")]
    let format = "dshow"; // DirectShow

    #[cfg(target_os = "macos")]
    let format = "avfoundation"; // AVFoundation

    #[cfg(target_os = "linux")]
    let format = "v4l2"; // Video4Linux2

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    let format = "video4linux2"; // 默认

    format
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize) -> Result<String> {
    #[cfg(target_os = "windows")]
    {
        // dshow 只接受设备名
        let devices = get_camera_devices();
        let (_, name) = devices
            .into_iter()
            .find(|(i, _)| *i == index)
            .ok_or_else(|| DetectError::CameraOpen {
                index,
                reason: "设备不存在".into(),
            })?;
        Ok(format!("video={}", name))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(format!("/dev/video{}", index))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Ok(format!("{}", index))
    }
}

/// 打开摄像头, 设备忙时重试
pub fn open_camera(index: usize) -> Result<FfmpegSource> {
    let url = format_camera_url(index)?;
    let format = capture_format();
    log::info!("🎥 打开摄像头 {} (格式: {}, 输入: {})", index, format, url);

    let mut retry_count = 0;
    loop {
        let input = Input::new(url.as_str()).set_format(format);
        match FfmpegSource::start(input, Delivery::DropWhenFull, DEFAULT_FPS) {
            Ok(source) => {
                log::info!("✅ 摄像头连接成功,开始解码!");
                return Ok(source);
            }
            Err(e) => {
                retry_count += 1;
                if retry_count >= MAX_RETRIES {
                    log::error!("❌ 摄像头打开失败 (重试{}次): {}", MAX_RETRIES, e);
                    return Err(DetectError::CameraOpen { index, reason: e });
                }
                log::warn!(
                    "⚠️ 摄像头忙或无法打开, 1秒后重试... ({}/{})",
                    retry_count,
                    MAX_RETRIES
                );
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
    }
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            log::warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
