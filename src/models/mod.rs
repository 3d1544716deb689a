/// 模型统一接口与实现
///
/// # 架构说明
///
/// ## Model Trait
/// 统一的模型接口: 输入一张图片和置信度阈值, 输出按置信度降序排列的检测目标。
/// 置信度过滤、NMS、类别映射全部在模型层完成, `Detector` 只负责传递阈值和格式化结果。
///
/// ## 具体实现
/// - **YOLOv8** (`onnx` feature): ONNX Runtime 推理 + `YOLOv8Postprocessor` 后处理
///   - 文件: `yolov8.rs`
///
/// ## ModelLoader
/// 按模型路径构造模型实例。`Controller` 在模型路径变化时通过它重建检测器,
/// 测试中可以替换为脚本化的实现。
///
/// ## 使用示例
/// ```ignore
/// use yolov8_detector::models::{Model, OnnxModelLoader, ModelLoader};
///
/// let mut model = OnnxModelLoader::default().load("yolov8n.onnx".as_ref())?;
/// let detections = model.forward(&image, 0.30)?;
/// ```
use std::path::Path;

use image::DynamicImage;

use crate::detection::types::Detection;
use crate::error::Result;

/// 统一的检测模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess(conf) → Vec<Detection>
/// ```
pub trait Model: Send {
    /// 完整的推理流程, 返回置信度不低于 `conf` 的目标
    fn forward(&mut self, image: &DynamicImage, conf: f32) -> Result<Vec<Detection>>;

    /// 类别名称表
    fn names(&self) -> &[String];

    /// 打印模型信息
    fn summary(&self) {}
}

/// 模型加载器
pub trait ModelLoader: Send {
    fn load(&self, path: &Path) -> Result<Box<dyn Model>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn Model>> + Send,
{
    fn load(&self, path: &Path) -> Result<Box<dyn Model>> {
        self(path)
    }
}

/// 类别名称, 缺失时回退为 `类别 <id>`
pub fn class_name(names: &[String], id: usize) -> String {
    names
        .get(id)
        .cloned()
        .unwrap_or_else(|| format!("类别 {}", id))
}

pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

// Re-exports
#[cfg(feature = "onnx")]
pub use yolov8::{OnnxModelLoader, YOLOv8};
pub use yolov8::{YOLOv8Config, YOLOv8Postprocessor};
