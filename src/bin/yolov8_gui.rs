// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 桌面界面: 控制面板 + 预览, 检测在后台线程执行
//
// cargo run --release --features full --bin yolov8-gui -- --model yolov8n.onnx

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use macroquad::prelude::*;

use yolov8_detector::input::default_backend;
use yolov8_detector::renderer::Renderer;
use yolov8_detector::result_log::FileLog;
use yolov8_detector::{
    init_logging, Args, Controller, DetectionSession, DetectorConfig, OnnxModelLoader, OrtEP,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn window_conf() -> Conf {
    Conf {
        window_title: "YOLOv8 目标检测".to_owned(),
        window_width: 1280,
        window_height: 800,
        high_dpi: true,
        ..Default::default()
    }
}

fn build_session(args: &Args) -> anyhow::Result<(DetectionSession, DetectorConfig)> {
    let config = args.resolve()?;
    config.print_summary();

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
    let controller = Controller::new(
        Box::new(loader),
        Arc::new(log),
        default_backend(),
        config.detector_options(),
    )
    .with_camera_index(config.camera);

    Ok((DetectionSession::new(controller), config))
}

#[macroquad::main(window_conf)]
async fn main() {
    init_logging(log::LevelFilter::Info);
    let args = Args::parse();

    let (session, config) = match build_session(&args) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            let _ = rfd::MessageDialog::new()
                .set_level(rfd::MessageLevel::Error)
                .set_title("启动失败")
                .set_description(format!("{:#}", e))
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
            std::process::exit(2);
        }
    };

    let mut renderer = Renderer::new(session, &config);
    prevent_quit();

    loop {
        renderer.handle_input();
        renderer.update();
        renderer.draw();
        renderer.draw_egui();

        if renderer.should_quit() || is_quit_requested() {
            break;
        }
        next_frame().await;
    }

    println!("👋 正在退出...");
    renderer.shutdown();
}
