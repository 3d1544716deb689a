// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 命令行检测: 单次调度, 同步执行
//
// cargo run --release --features onnx,ffmpeg --bin yolov8 -- --model yolov8n.onnx --source bus.jpg

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;

use yolov8_detector::dispatch::DispatchListener;
use yolov8_detector::input::default_backend;
use yolov8_detector::result_log::FileLog;
use yolov8_detector::{
    init_logging, Args, CancelToken, Controller, DetectError, Detection, OnnxModelLoader, OrtEP,
    Outcome,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 进度打印间隔 (帧)
const PROGRESS_EVERY: u64 = 30;

/// 终端输出
struct Console {
    frames: u64,
}

impl DispatchListener for Console {
    fn status(&mut self, message: &str) {
        if self.frames > 0 {
            println!();
            self.frames = 0;
        }
        println!("📌 {}", message);
    }

    fn frame(&mut self, _annotated: &RgbImage, _detections: &[Detection]) {
        self.frames += 1;
        if self.frames % PROGRESS_EVERY == 0 {
            print!("\r⏳ 已处理 {} 帧", self.frames);
            let _ = std::io::stdout().flush();
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = args.resolve()?;
    config.print_summary();

    // 配置错误直接退出, 不写日志
    let request = match config.request() {
        Ok(request) => request,
        Err(DetectError::MissingSource) => {
            anyhow::bail!("请指定输入源 (--source) 或使用 --help 查看帮助")
        }
        Err(e) => return Err(e.into()),
    };

    // 运行表头, 每个进程一次
    let log = FileLog::init(&config.log_file)
        .with_context(|| format!("无法创建日志文件 {}", config.log_file.display()))?;

    let ep = if args.trt {
        OrtEP::Trt(args.device_id)
    } else if args.cuda {
        OrtEP::CUDA(args.device_id)
    } else {
        OrtEP::CPU
    };
    let loader = OnnxModelLoader {
        ep,
        iou: config.iou,
        imgsz: None,
        profile: args.profile,
    };

    let mut controller = Controller::new(
        Box::new(loader),
        Arc::new(log),
        default_backend(),
        config.detector_options(),
    )
    .with_camera_index(config.camera);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            println!("\n🛑 收到 Ctrl+C, 正在停止...");
            cancel.cancel();
        })
        .context("无法注册 Ctrl+C 处理")?;
    }

    let mut console = Console { frames: 0 };
    let outcome = controller.dispatch(&request, &cancel, &mut console);

    match &outcome {
        Outcome::Completed(result) => {
            for (i, det) in result.detections.iter().enumerate() {
                println!(
                    "  {}. {} {:.2} [{:.1}, {:.1}, {:.1}, {:.1}]",
                    i + 1,
                    det.class_name,
                    det.confidence,
                    det.bbox.x1,
                    det.bbox.y1,
                    det.bbox.x2,
                    det.bbox.y2
                );
            }
            if let Some(out) = &result.output_path {
                println!("💾 结果已保存: {}", out.display());
            }
            println!("✅ 检测完成");
        }
        Outcome::UnsupportedFormat | Outcome::SourceNotExist => {
            println!("⚠️ {}", outcome.status());
        }
        Outcome::Error { message, .. } => {
            eprintln!("❌ 检测出错: {}", message);
        }
    }
    println!("📝 检测日志: {}", config.log_file.display());

    if args.strict && outcome.is_error() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    init_logging(log::LevelFilter::Info);
    let args = Args::parse();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(2)
        }
    }
}
