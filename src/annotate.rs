//! 检测结果绘制
//!
//! 在图片/视频帧上画检测框和 `类别 置信度` 标签。标签需要字体, 找不到字体时只画框。

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detection::types::{BBox, Detection};
use crate::error::{DetectError, Result};

/// 结果文件前缀
pub const RESULT_PREFIX: &str = "result_";

const BRIGHT_COLORS: [(u8, u8, u8); 12] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (255, 128, 0),   // 橙色
    (255, 0, 128),   // 粉红
    (128, 255, 0),   // 黄绿
    (0, 128, 255),   // 天蓝
    (255, 255, 255), // 白色
    (128, 0, 255),   // 紫色
];

/// 常见系统字体
const FONT_CANDIDATES: &[&str] = &[
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
    "/System/Library/Fonts/PingFang.ttc",
    "/System/Library/Fonts/Helvetica.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

pub fn color_for(class_id: usize) -> Rgb<u8> {
    let (r, g, b) = BRIGHT_COLORS[class_id % BRIGHT_COLORS.len()];
    Rgb([r, g, b])
}

pub struct Annotator {
    font: Option<FontVec>,
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            thickness: 3,
        }
    }
}

impl Annotator {
    /// 加载指定字体; 未指定时尝试系统字体
    pub fn new(font: Option<&Path>) -> Self {
        let font = match font {
            Some(path) => match load_font(path) {
                Ok(f) => Some(f),
                Err(e) => {
                    log::warn!("⚠️ 字体加载失败, 标签将不显示: {}", e);
                    None
                }
            },
            None => {
                let found = FONT_CANDIDATES
                    .iter()
                    .map(Path::new)
                    .filter(|p| p.exists())
                    .find_map(|p| load_font(p).ok());
                if found.is_none() {
                    log::warn!("⚠️ 未找到可用字体, 只绘制检测框");
                }
                found
            }
        };
        Self { font, thickness: 3 }
    }

    /// 在图片上绘制全部检测结果
    pub fn draw(&self, image: &mut RgbImage, detections: &[Detection]) {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return;
        }

        for det in detections {
            let color = color_for(det.class_id);
            let Some(rect) = rect_from_bbox(&det.bbox, w, h) else {
                continue;
            };
            for t in 0..self.thickness as i32 {
                let (rw, rh) = (rect.width() as i32 - 2 * t, rect.height() as i32 - 2 * t);
                if rw <= 0 || rh <= 0 {
                    break;
                }
                let inner = Rect::at(rect.left() + t, rect.top() + t).of_size(rw as u32, rh as u32);
                draw_hollow_rect_mut(image, inner, color);
            }

            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", det.class_name, det.confidence);
                let scale = PxScale::from((h as f32 / 40.0).clamp(12.0, 32.0));
                let (tw, th) = text_size(scale, font, &label);
                // 标签放在框上方, 放不下时放在框内
                let ty = if rect.top() >= th as i32 + 4 {
                    rect.top() - th as i32 - 4
                } else {
                    rect.top()
                };
                let bg = Rect::at(rect.left(), ty).of_size(tw + 4, th + 4);
                draw_filled_rect_mut(image, bg, color);
                draw_text_mut(
                    image,
                    text_color(color),
                    rect.left() + 2,
                    ty + 2,
                    scale,
                    font,
                    &label,
                );
            }
        }
    }
}

fn load_font(path: &Path) -> std::result::Result<FontVec, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    FontVec::try_from_vec(bytes).map_err(|e| format!("{}: {}", path.display(), e))
}

/// 亮色背景用黑字
fn text_color(bg: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = bg.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 140.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// BBox → 像素矩形, 裁剪到图片范围内
fn rect_from_bbox(bbox: &BBox, img_w: u32, img_h: u32) -> Option<Rect> {
    let max_x = (img_w - 1) as f32;
    let max_y = (img_h - 1) as f32;

    let x1 = bbox.x1.clamp(0.0, max_x).round();
    let y1 = bbox.y1.clamp(0.0, max_y).round();
    let x2 = bbox.x2.clamp(0.0, max_x).round();
    let y2 = bbox.y2.clamp(0.0, max_y).round();

    if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
        return None;
    }
    let width = (x2 - x1 + 1.0).max(1.0) as u32;
    let height = (y2 - y1 + 1.0).max(1.0) as u32;
    Some(Rect::at(x1 as i32, y1 as i32).of_size(width, height))
}

/// 结果文件路径: `<output_dir>/result_<源文件名>`
pub fn result_path(output_dir: &Path, source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| DetectError::Output(format!("无效的源文件名: {}", source.display())))?;
    let mut file_name = std::ffi::OsString::from(RESULT_PREFIX);
    file_name.push(name);
    Ok(output_dir.join(file_name))
}

/// 保存标注后的图片
pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image
        .save(path)
        .map_err(|e| DetectError::Output(format!("{}: {}", path.display(), e)))
}
