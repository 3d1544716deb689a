use std::collections::VecDeque;
use std::path::PathBuf;

use egui_macroquad::egui;
use rfd::FileDialog;

use crate::detection::types::CAMERA_TOKEN;
use crate::dispatch::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

/// 日志面板最多保留的行数
const MAX_LOG_LINES: usize = 500;

/// 控制面板状态
pub struct ControlPanel {
    pub model_path: String,
    pub source: String,
    pub confidence_threshold: f32,

    // 状态
    pub running: bool,
    pub render_fps: f64,
    pub frame_count: u64,
    pub last_detections: usize,

    logs: VecDeque<String>,
}

/// 控制面板操作返回值
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlPanelActions {
    pub start: bool,
    pub stop: bool,
    pub quit: bool,
}

impl ControlPanel {
    pub fn new(model_path: String, source: String, confidence_threshold: f32) -> Self {
        Self {
            model_path,
            source,
            confidence_threshold,
            running: false,
            render_fps: 0.0,
            frame_count: 0,
            last_detections: 0,
            logs: VecDeque::new(),
        }
    }

    /// 追加一行日志, 超出上限时丢弃最早的
    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().map(String::as_str)
    }

    fn browse_model(&mut self) {
        if let Some(path) = FileDialog::new()
            .set_title("选择模型文件")
            .add_filter("ONNX模型文件", &["onnx"])
            .add_filter("所有文件", &["*"])
            .pick_file()
        {
            self.model_path = path.display().to_string();
        }
    }

    fn browse_source(&mut self) {
        let media: Vec<&str> = IMAGE_EXTENSIONS
            .iter()
            .chain(VIDEO_EXTENSIONS.iter())
            .copied()
            .collect();
        let mut dialog = FileDialog::new()
            .set_title("选择图片或视频")
            .add_filter("图片和视频", media.as_slice())
            .add_filter("图片文件", &IMAGE_EXTENSIONS)
            .add_filter("视频文件", &VIDEO_EXTENSIONS)
            .add_filter("所有文件", &["*"]);
        if let Some(dir) = PathBuf::from(&self.source).parent() {
            if dir.is_dir() {
                dialog = dialog.set_directory(dir);
            }
        }
        if let Some(path) = dialog.pick_file() {
            self.source = path.display().to_string();
        }
    }

    fn set_style(&self, ctx: &egui::Context) {
        // 半透明深色面板, 不遮挡预览
        let mut visuals = egui::Visuals::dark();
        visuals.window_fill = egui::Color32::from_rgba_premultiplied(20, 24, 32, 220);
        visuals.window_stroke = egui::Stroke::new(
            1.0,
            egui::Color32::from_rgba_premultiplied(255, 255, 255, 30),
        );
        visuals.widgets.inactive.bg_stroke = egui::Stroke::new(
            1.0,
            egui::Color32::from_rgba_premultiplied(180, 190, 200, 80),
        );
        visuals.widgets.hovered.fg_stroke = egui::Stroke::new(1.5, egui::Color32::WHITE);
        visuals.selection.bg_fill = egui::Color32::from_rgba_premultiplied(100, 150, 255, 100);
        visuals.override_text_color = Some(egui::Color32::from_rgb(230, 240, 250));
        ctx.set_visuals(visuals);
    }

    pub fn show(&mut self, ctx: &egui::Context, open: &mut bool) -> ControlPanelActions {
        if !*open {
            return ControlPanelActions::default();
        }
        self.set_style(ctx);

        egui::Window::new("🎯 YOLOv8 目标检测")
            .default_pos(egui::pos2(10.0, 10.0))
            .default_size(egui::vec2(380.0, 600.0))
            .resizable(true)
            .title_bar(true)
            .show(ctx, |ui| self.ui(ui))
            .and_then(|r| r.inner)
            .unwrap_or_default()
    }

    /// 绘制控制面板UI
    fn ui(&mut self, ui: &mut egui::Ui) -> ControlPanelActions {
        let mut actions = ControlPanelActions::default();

        ui.style_mut().visuals.collapsing_header_frame = false;

        // --- 模型与输入源 ---
        egui::CollapsingHeader::new("⚙️ 模型与输入源")
            .default_open(true)
            .show(ui, |ui| {
                ui.add_enabled_ui(!self.running, |ui| {
                    ui.label("模型文件:");
                    ui.horizontal(|ui| {
                        ui.add(
                            egui::TextEdit::singleline(&mut self.model_path)
                                .desired_width(ui.available_width() - 60.0)
                                .hint_text("yolov8n.onnx"),
                        );
                        if ui.button("浏览").clicked() {
                            self.browse_model();
                        }
                    });

                    ui.label("输入源:");
                    ui.horizontal(|ui| {
                        ui.add(
                            egui::TextEdit::singleline(&mut self.source)
                                .desired_width(ui.available_width() - 60.0)
                                .hint_text("图片/视频路径, 或 camera"),
                        );
                        if ui.button("浏览").clicked() {
                            self.browse_source();
                        }
                    });
                    if ui.button("📷 使用摄像头").clicked() {
                        self.source = CAMERA_TOKEN.to_string();
                    }

                    ui.separator();
                    ui.horizontal(|ui| {
                        ui.add(
                            egui::Slider::new(&mut self.confidence_threshold, 0.01..=1.0)
                                .text("置信度")
                                .show_value(false),
                        );
                        ui.label(format!("{:.2}", self.confidence_threshold));
                    });
                });
            });

        ui.separator();

        // --- 操作 ---
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!self.running, egui::Button::new("▶ 开始检测"))
                .clicked()
            {
                actions.start = true;
            }
            if ui
                .add_enabled(self.running, egui::Button::new("⏹ 停止检测"))
                .clicked()
            {
                actions.stop = true;
            }
            if ui.button("退出").clicked() {
                actions.quit = true;
            }
            if self.running {
                ui.spinner();
            }
        });

        ui.separator();

        // --- 状态 ---
        egui::CollapsingHeader::new("📊 状态")
            .default_open(true)
            .show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.label("渲染 FPS:");
                    ui.colored_label(egui::Color32::GREEN, format!("{:.1}", self.render_fps));
                    ui.label("| 已处理帧:");
                    ui.colored_label(egui::Color32::CYAN, self.frame_count.to_string());
                    ui.label("| 当前目标:");
                    ui.colored_label(egui::Color32::YELLOW, self.last_detections.to_string());
                });
            });

        ui.separator();

        // --- 日志 ---
        ui.label("📝 检测日志");
        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .stick_to_bottom(true)
            .max_height(ui.available_height().max(120.0))
            .show(ui, |ui| {
                for line in &self.logs {
                    ui.label(line);
                }
            });

        actions
    }
}
