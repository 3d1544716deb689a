// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 完整模型实现
// 包含: 模型加载、预处理、推理、后处理

use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayView, Axis, Ix4, IxDyn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::detection::types::{BBox, Detection};
use crate::error::{DetectError, Result};
use crate::non_max_suppression;

#[cfg(feature = "onnx")]
use crate::{OrtBackend, OrtConfig, OrtEP};

/// 默认推理尺寸
pub const DEFAULT_IMGSZ: u32 = 640;

/// 填充颜色 (灰)
const PAD_VALUE: f32 = 144.0 / 255.0;

const CXYWH_OFFSET: usize = 4;

/// YOLOv8 后处理配置
#[derive(Debug, Clone)]
pub struct YOLOv8Config {
    pub nc: usize,
    pub iou: f32,
    pub width: u32,
    pub height: u32,
}

impl YOLOv8Config {
    pub fn new(nc: usize, width: u32, height: u32, iou: f32) -> Self {
        Self {
            nc,
            iou,
            width,
            height,
        }
    }
}

/// YOLOv8 后处理器
///
/// 输入张量形状 `[batch, 4 + nc, anchors]`, 每列为 `cx, cy, w, h, score_0..score_nc`。
pub struct YOLOv8Postprocessor {
    config: YOLOv8Config,
}

impl YOLOv8Postprocessor {
    pub fn new(config: YOLOv8Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YOLOv8Config {
        &self.config
    }

    fn ratio(&self, w0: f32, h0: f32) -> f32 {
        (self.config.width as f32 / w0).min(self.config.height as f32 / h0)
    }

    /// 解码第 `idx` 张图片的输出
    ///
    /// `(w0, h0)` 为原图尺寸, 结果按置信度降序排列。
    pub fn postprocess(
        &self,
        preds: ArrayView<f32, IxDyn>,
        idx: usize,
        (w0, h0): (u32, u32),
        conf: f32,
        names: &[String],
    ) -> Result<Vec<Detection>> {
        if preds.ndim() != 3 {
            return Err(DetectError::Inference(format!(
                "unexpected output shape {:?}",
                preds.shape()
            )));
        }
        let rows = preds.shape()[1];
        let nc = self.config.nc.min(rows.saturating_sub(CXYWH_OFFSET));
        if nc == 0 {
            return Err(DetectError::Inference(format!(
                "output has no class scores: {:?}",
                preds.shape()
            )));
        }

        let width_original = w0 as f32;
        let height_original = h0 as f32;
        let ratio = self.ratio(width_original, height_original);

        let anchor = preds.index_axis(Axis(0), idx);
        let mut data: Vec<(BBox, usize, f32)> = Vec::new();
        for pred in anchor.axis_iter(Axis(1)) {
            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

            let Some((id, &confidence)) = clss
                .into_iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };

            if confidence < conf {
                continue;
            }

            let cx = bbox[0] / ratio;
            let cy = bbox[1] / ratio;
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            let x = cx - w / 2.;
            let y = cy - h / 2.;
            let y_bbox = BBox::new(
                x.clamp(0.0, width_original),
                y.clamp(0.0, height_original),
                (x + w).clamp(0.0, width_original),
                (y + h).clamp(0.0, height_original),
            );
            data.push((y_bbox, id, confidence));
        }

        non_max_suppression(&mut data, self.config.iou);

        Ok(data
            .into_iter()
            .map(|(bbox, id, confidence)| Detection {
                class_id: id,
                class_name: super::class_name(names, id),
                confidence,
                bbox,
            })
            .collect())
    }
}

fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 预处理: 等比缩放到左上角, 其余区域灰色填充, 输出 NCHW
pub fn preprocess(x: &DynamicImage, width: u32, height: u32) -> Array<f32, Ix4> {
    let mut ys = Array::from_elem((1, 3, height as usize, width as usize), PAD_VALUE);

    let (w0, h0) = x.dimensions();
    let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
    let img = x.resize_exact(
        (w_new as u32).clamp(1, width),
        (h_new as u32).clamp(1, height),
        image::imageops::FilterType::Triangle,
    );

    for (x, y, rgb) in img.pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b, _] = rgb.0;
        ys[[0, 0, y, x]] = (r as f32) / 255.0;
        ys[[0, 1, y, x]] = (g as f32) / 255.0;
        ys[[0, 2, y, x]] = (b as f32) / 255.0;
    }

    ys
}

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).expect("valid names pattern")
});

static IMGSZ_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)").expect("valid imgsz pattern"));

/// 解析导出器写入的类别元数据, 如 `{0: 'person', 1: 'bicycle'}`
pub fn parse_names(meta: &str) -> Vec<String> {
    let mut pairs: Vec<(usize, String)> = NAME_PATTERN
        .captures_iter(meta)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);

    let len = pairs.last().map(|(id, _)| id + 1).unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|i| format!("类别 {}", i)).collect();
    for (id, name) in pairs {
        names[id] = name;
    }
    names
}

/// 解析 `imgsz` 元数据, 如 `[640, 640]` → (height, width)
pub fn parse_imgsz(meta: &str) -> Option<(u32, u32)> {
    let dims: Vec<u32> = IMGSZ_PATTERN
        .captures_iter(meta)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    match dims.as_slice() {
        [s] => Some((*s, *s)),
        [h, w, ..] => Some((*h, *w)),
        _ => None,
    }
}

/// YOLOv8 完整模型结构
#[cfg(feature = "onnx")]
pub struct YOLOv8 {
    engine: OrtBackend,
    postprocessor: YOLOv8Postprocessor,
    names: Vec<String>,
    profile: bool,
}

#[cfg(feature = "onnx")]
impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: OrtConfig, iou: f32, profile: bool) -> Result<Self> {
        let path = config.f.clone();
        let engine = OrtBackend::build(config).map_err(|e| DetectError::ModelLoad {
            path: path.clone().into(),
            reason: format!("{:#}", e),
        })?;

        if let Some(task) = engine.task() {
            if task != "detect" {
                return Err(DetectError::ModelLoad {
                    path: path.into(),
                    reason: format!("unsupported task `{}`, expected `detect`", task),
                });
            }
        }

        let names = engine.names();
        let nc = engine.nc().unwrap_or(names.len());
        let postprocessor = YOLOv8Postprocessor::new(YOLOv8Config::new(
            nc,
            engine.width(),
            engine.height(),
            iou,
        ));

        Ok(Self {
            engine,
            postprocessor,
            names,
            profile,
        })
    }
}

#[cfg(feature = "onnx")]
impl super::Model for YOLOv8 {
    fn forward(&mut self, image: &DynamicImage, conf: f32) -> Result<Vec<Detection>> {
        let t_pre = std::time::Instant::now();
        let xs = preprocess(image, self.engine.width(), self.engine.height());
        if self.profile {
            log::debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = std::time::Instant::now();
        let ys = self
            .engine
            .run(xs.into_dyn())
            .map_err(|e| DetectError::Inference(format!("{:#}", e)))?;
        if self.profile {
            log::debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = std::time::Instant::now();
        let preds = ys
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;
        let detections =
            self.postprocessor
                .postprocess(preds.view(), 0, image.dimensions(), conf, &self.names)?;
        if self.profile {
            log::debug!("[Model Postprocess]: {:?}", t_post.elapsed());
        }

        Ok(detections)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {
        log::info!(
            "\nSummary:\n\
            > Task: detect{}\n\
            > EP: {:?} {}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, iou: {}\n",
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::from(""),
            },
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.engine.height(),
            self.engine.width(),
            self.postprocessor.config().nc,
            self.postprocessor.config().iou,
        );
    }
}

/// 基于 ONNX Runtime 的模型加载器
#[cfg(feature = "onnx")]
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    pub ep: OrtEP,
    pub iou: f32,
    pub imgsz: Option<u32>,
    pub profile: bool,
}

#[cfg(feature = "onnx")]
impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self {
            ep: OrtEP::CPU,
            iou: 0.45,
            imgsz: None,
            profile: false,
        }
    }
}

#[cfg(feature = "onnx")]
impl super::ModelLoader for OnnxModelLoader {
    fn load(&self, path: &std::path::Path) -> Result<Box<dyn super::Model>> {
        if !path.exists() {
            return Err(DetectError::ModelNotFound(path.to_path_buf()));
        }
        let config = OrtConfig {
            f: path.to_string_lossy().into_owned(),
            ep: self.ep,
            image_size: self.imgsz.map(|s| (s, s)),
        };
        let model = YOLOv8::new(config, self.iou, self.profile)?;
        super::Model::summary(&model);
        Ok(Box::new(model))
    }
}
