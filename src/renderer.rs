// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
mod control_panel;

use std::path::Path;
use std::time::Instant;

use egui_macroquad::egui;
use image::{DynamicImage, RgbImage};
use macroquad::prelude::*;
use rfd::{MessageButtons, MessageDialog, MessageLevel};

use crate::config::DetectorConfig;
use crate::detection::types::DetectionRequest;
use crate::dispatch::Outcome;
use crate::error::DetectError;
use crate::worker::{DetectionSession, WorkerEvent};
pub use control_panel::{ControlPanel, ControlPanelActions};

/// 界面中文字体
const CJK_FONT_CANDIDATES: &[&str] = &[
    "assets/font/msyh.ttc",
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\simhei.ttf",
    "/System/Library/Fonts/PingFang.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
];

fn load_font_bytes(configured: Option<&Path>) -> Option<Vec<u8>> {
    configured
        .into_iter()
        .chain(CJK_FONT_CANDIDATES.iter().map(Path::new))
        .find_map(|p| std::fs::read(p).ok())
}

pub struct Renderer {
    session: DetectionSession,
    control_panel: ControlPanel,
    show_control_panel: bool,

    last_frame: Option<Texture2D>,
    chinese_font: Option<Font>,

    render_count: u64,
    render_last: Instant,

    quit: bool,
}

impl Renderer {
    pub fn new(session: DetectionSession, config: &DetectorConfig) -> Self {
        println!("🎨 渲染器启动");

        let font_bytes = load_font_bytes(config.font.as_deref());
        let chinese_font = match font_bytes.as_deref().map(load_ttf_font_from_bytes) {
            Some(Ok(font)) => {
                println!("✅ 中文字体加载成功");
                Some(font)
            }
            Some(Err(e)) => {
                println!("⚠️ 中文字体加载失败: {}", e);
                None
            }
            None => {
                println!("⚠️ 未找到中文字体, 界面文字可能无法显示");
                None
            }
        };

        // egui 默认字体不含中文
        if let Some(bytes) = font_bytes {
            let mut fonts = egui::FontDefinitions::default();
            fonts
                .font_data
                .insert("cjk".to_owned(), egui::FontData::from_owned(bytes).into());
            for family in [egui::FontFamily::Proportional, egui::FontFamily::Monospace] {
                fonts
                    .families
                    .entry(family)
                    .or_default()
                    .push("cjk".to_owned());
            }
            egui_macroquad::cfg(|egui_ctx| egui_ctx.set_fonts(fonts.clone()));
        }

        let control_panel = ControlPanel::new(
            config
                .model
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            config.source.clone().unwrap_or_default(),
            config.conf,
        );

        Self {
            session,
            control_panel,
            show_control_panel: true,
            last_frame: None,
            chinese_font,
            render_count: 0,
            render_last: Instant::now(),
            quit: false,
        }
    }

    /// 是否已请求退出
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// 停止检测并等待工作线程结束
    pub fn shutdown(&mut self) {
        if self.session.is_running() {
            self.session.stop();
            for event in self.session.wait() {
                if let WorkerEvent::Log(line) = event {
                    log::info!("{}", line);
                }
            }
        }
    }

    pub fn update(&mut self) {
        for event in self.session.poll() {
            match event {
                WorkerEvent::Log(line) => self.control_panel.push_log(line),
                WorkerEvent::Frame { image, detections } => {
                    self.control_panel.frame_count += 1;
                    self.control_panel.last_detections = detections;
                    self.update_texture(image);
                }
                WorkerEvent::Finished(outcome) => {
                    self.control_panel.running = false;
                    self.on_finished(&outcome);
                }
            }
        }
    }

    fn on_finished(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed(result) => {
                if let Some(out) = &result.output_path {
                    self.control_panel
                        .push_log(format!("结果已保存: {}", out.display()));
                    // 图片结果直接显示在预览区
                    if result.source_kind == crate::SourceKind::Image {
                        match image::open(out) {
                            Ok(img) => self.update_texture(img.into_rgb8()),
                            Err(e) => log::warn!("⚠️ 无法加载结果图片: {}", e),
                        }
                    }
                }
            }
            Outcome::Error { message, .. } => {
                log::error!("❌ 检测出错: {}", message);
            }
            Outcome::UnsupportedFormat | Outcome::SourceNotExist => {}
        }
    }

    fn update_texture(&mut self, frame: RgbImage) {
        let rgba = DynamicImage::ImageRgb8(frame).into_rgba8();
        let (width, height) = (rgba.width() as u16, rgba.height() as u16);

        // 只在分辨率变化时重建纹理，否则更新像素数据
        let needs_rebuild = match &self.last_frame {
            Some(tex) => tex.width() != width as f32 || tex.height() != height as f32,
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(width, height, rgba.as_raw());
            texture.set_filter(FilterMode::Linear);
            self.last_frame = Some(texture);
        } else if let Some(tex) = &self.last_frame {
            let img = Image {
                bytes: rgba.into_raw(),
                width,
                height,
            };
            tex.update(&img);
        }
    }

    /// 校验界面输入并启动检测; 配置错误弹窗提示, 不启动工作线程
    fn start_detection(&mut self) {
        let request = DetectionRequest::new(
            self.control_panel.model_path.trim(),
            self.control_panel.source.trim(),
            self.control_panel.confidence_threshold,
        );
        let result = request.and_then(|request| self.session.start(request));

        match result {
            Ok(()) => {
                self.control_panel.running = true;
                self.control_panel.frame_count = 0;
                self.control_panel.last_detections = 0;
                self.last_frame = None;
            }
            Err(e) => {
                log::warn!("⚠️ {}", e);
                let level = match e {
                    DetectError::Busy => MessageLevel::Info,
                    _ => MessageLevel::Warning,
                };
                let _ = MessageDialog::new()
                    .set_level(level)
                    .set_title("提示")
                    .set_description(e.to_string())
                    .set_buttons(MessageButtons::Ok)
                    .show();
            }
        }
    }

    fn apply(&mut self, actions: ControlPanelActions) {
        if actions.start {
            self.start_detection();
        }
        if actions.stop {
            self.session.stop();
            self.control_panel.push_log("正在停止检测...");
        }
        if actions.quit {
            self.quit = true;
        }
    }

    pub fn draw(&mut self) {
        clear_background(Color::from_rgba(20, 20, 30, 255));

        // 绘制预览, 保持宽高比居中
        if let Some(texture) = &self.last_frame {
            let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
            let w = texture.width() * scale;
            let h = texture.height() * scale;
            draw_texture_ex(
                texture,
                (screen_width() - w) / 2.0,
                (screen_height() - h) / 2.0,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        } else {
            let text = "请在控制面板选择模型和输入源后开始检测";
            let font_size = 32;
            let text_dims = measure_text(text, self.chinese_font.as_ref(), font_size, 1.0);
            draw_text_ex(
                text,
                (screen_width() - text_dims.width) / 2.0,
                (screen_height() - text_dims.height) / 2.0,
                TextParams {
                    font: self.chinese_font.as_ref(),
                    font_size,
                    color: WHITE,
                    ..Default::default()
                },
            );
        }

        // FPS统计
        self.render_count += 1;
        let now = Instant::now();
        if now.duration_since(self.render_last).as_secs() >= 1 {
            self.control_panel.render_fps =
                self.render_count as f64 / now.duration_since(self.render_last).as_secs_f64();
            self.render_count = 0;
            self.render_last = now;
        }
    }

    pub fn draw_egui(&mut self) {
        let mut actions = ControlPanelActions::default();
        egui_macroquad::ui(|egui_ctx| {
            actions = self
                .control_panel
                .show(egui_ctx, &mut self.show_control_panel);
        });
        egui_macroquad::draw();

        self.apply(actions);
    }

    pub fn handle_input(&mut self) {
        if is_key_pressed(KeyCode::Tab) {
            self.show_control_panel = !self.show_control_panel;
        }
        if is_key_pressed(KeyCode::Escape) && self.session.is_running() {
            self.session.stop();
        }
    }
}
