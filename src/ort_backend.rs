// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use anyhow::{anyhow, Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::models::yolov8::{parse_imgsz, parse_names, DEFAULT_IMGSZ};

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    /// (height, width); 为空时读取模型元数据或输入形状
    pub image_size: Option<(u32, u32)>,
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    height: u32,
    width: u32,
    input_name: String,
    task: Option<String>,
    names: Vec<String>,
    author: Option<String>,
    version: Option<String>,
    nc: Option<usize>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let providers: Vec<ExecutionProviderDispatch> = match args.ep {
            OrtEP::Trt(id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(id)
                    .build(),
                CUDAExecutionProvider::default().with_device_id(id).build(),
            ],
            OrtEP::CUDA(id) => vec![CUDAExecutionProvider::default().with_device_id(id).build()],
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
        };

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(providers)?
            .commit_from_file(&args.f)
            .with_context(|| format!("无法加载 ONNX 模型: {}", args.f))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("模型没有输入节点"))?;
        let input_name = input.name.clone();
        let dims: Vec<i64> = input
            .input_type
            .tensor_dimensions()
            .cloned()
            .unwrap_or_default();

        let meta = |key: &str| -> Option<String> {
            session
                .metadata()
                .ok()
                .and_then(|m| m.custom(key).ok().flatten())
        };
        let names = meta("names").map(|s| parse_names(&s)).unwrap_or_default();
        let task = meta("task");
        let author = meta("author");
        let version = meta("version");
        let meta_imgsz = meta("imgsz").and_then(|s| parse_imgsz(&s));

        // 动态维度 (-1) 时回退到元数据或默认尺寸
        let dim = |i: usize| dims.get(i).copied().filter(|d| *d > 0).map(|d| d as u32);
        let (height, width) = match (args.image_size, dim(2).zip(dim(3))) {
            (Some(hw), _) => hw,
            (None, Some(hw)) => hw,
            (None, None) => meta_imgsz.unwrap_or((DEFAULT_IMGSZ, DEFAULT_IMGSZ)),
        };

        // 输出形状 [batch, 4 + nc, anchors]
        let nc = session
            .outputs
            .first()
            .and_then(|o| o.output_type.tensor_dimensions())
            .and_then(|d| d.get(1).copied())
            .filter(|d| *d > 4)
            .map(|d| d as usize - 4)
            .or(if names.is_empty() {
                None
            } else {
                Some(names.len())
            });

        Ok(Self {
            session,
            ep: args.ep,
            height,
            width,
            input_name,
            task,
            names,
            author,
            version,
            nc,
        })
    }

    pub fn run(&self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let mut ys = Vec::with_capacity(outputs.len());
        for (_, value) in outputs.iter() {
            let y = value.try_extract_tensor::<f32>()?;
            ys.push(y.into_owned());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    pub fn nc(&self) -> Option<usize> {
        self.nc
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}
