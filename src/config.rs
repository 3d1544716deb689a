//! 命令行参数与配置文件
//!
//! 配置文件为只读 JSON, 命令行参数优先。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::detection::types::{DetectionRequest, DEFAULT_CONF};
use crate::detection::DetectorOptions;
use crate::result_log::DEFAULT_LOG_FILE;

pub const DEFAULT_IOU: f32 = 0.45;

/// YOLOv8 目标检测
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "YOLOv8 目标检测 (图片 / 视频 / 摄像头)", long_about = None)]
pub struct Args {
    /// ONNX 模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 输入源: 图片/视频路径, 或 `camera`
    #[arg(short, long)]
    pub source: Option<String>,

    /// 置信度阈值 (0, 1], 默认 0.30
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IoU 阈值, 默认 0.45
    #[arg(long)]
    pub iou: Option<f32>,

    /// 摄像头编号, 默认 0
    #[arg(long)]
    pub camera: Option<usize>,

    /// 检测日志文件, 默认 out.txt
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// 标注结果输出目录, 默认当前目录
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// 不保存标注后的图片/视频
    #[arg(long)]
    pub no_save: bool,

    /// 标签字体 (ttf/otf/ttc)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// JSON 配置文件
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 检测出错时以非零状态退出
    #[arg(long)]
    pub strict: bool,

    /// 使用 CUDA
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT
    #[arg(long)]
    pub trt: bool,

    /// GPU 编号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 打印各阶段耗时
    #[arg(long)]
    pub profile: bool,
}

/// 检测配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model: Option<PathBuf>,
    pub source: Option<String>,
    pub conf: f32,
    pub iou: f32,
    pub camera: usize,
    pub log_file: PathBuf,
    pub output_dir: PathBuf,
    pub save_result: bool,
    pub font: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: None,
            source: None,
            conf: DEFAULT_CONF,
            iou: DEFAULT_IOU,
            camera: 0,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            output_dir: PathBuf::from("."),
            save_result: true,
            font: None,
        }
    }
}

impl DetectorConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("配置文件解析失败 {}", path.display()))?;
        log::info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 命令行参数覆盖配置文件
    pub fn merge(mut self, args: &Args) -> Self {
        if let Some(model) = &args.model {
            self.model = Some(model.clone());
        }
        if let Some(source) = &args.source {
            self.source = Some(source.clone());
        }
        if let Some(conf) = args.conf {
            self.conf = conf;
        }
        if let Some(iou) = args.iou {
            self.iou = iou;
        }
        if let Some(camera) = args.camera {
            self.camera = camera;
        }
        if let Some(log_file) = &args.log_file {
            self.log_file = log_file.clone();
        }
        if let Some(output_dir) = &args.output_dir {
            self.output_dir = output_dir.clone();
        }
        if args.no_save {
            self.save_result = false;
        }
        if let Some(font) = &args.font {
            self.font = Some(font.clone());
        }
        self
    }

    /// 由配置构造检测请求; 缺少模型或输入源时返回配置错误
    pub fn request(&self) -> crate::error::Result<DetectionRequest> {
        DetectionRequest::new(
            self.model.clone().unwrap_or_default(),
            self.source.clone().unwrap_or_default(),
            self.conf,
        )
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            output_dir: self.output_dir.clone(),
            save_result: self.save_result,
            font: self.font.clone(),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        println!("\n🎛️  当前检测配置:");
        if let Some(model) = &self.model {
            println!("  模型: {}", model.display());
        }
        println!("  输入源: {}", self.source.as_deref().unwrap_or("(未指定)"));
        println!("  置信度阈值: {:.2}", self.conf);
        println!("  IoU 阈值: {:.2}", self.iou);
        println!("  摄像头编号: {}", self.camera);
        println!("  日志文件: {}", self.log_file.display());
        println!(
            "  结果输出: {}",
            if self.save_result {
                self.output_dir.display().to_string()
            } else {
                "不保存".to_string()
            }
        );
        println!();
    }
}

impl Args {
    /// 解析最终配置: 配置文件 (如有) + 命令行覆盖
    pub fn resolve(&self) -> Result<DetectorConfig> {
        let base = match &self.config {
            Some(path) => DetectorConfig::load(path)?,
            None => DetectorConfig::default(),
        };
        Ok(base.merge(self))
    }
}
