mod common;

use std::sync::Arc;

use common::*;
use yolov8_detector::dispatch::{DispatchListener, LogListener};
use yolov8_detector::result_log::MemoryLog;
use yolov8_detector::{
    BBox, CancelToken, Controller, DetectError, DetectionRequest, Outcome, SourceKind,
};

/// 记录所有状态消息和帧数
#[derive(Default)]
struct Recorder {
    messages: Vec<String>,
    frames: usize,
}

impl DispatchListener for Recorder {
    fn status(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn frame(&mut self, _annotated: &image::RgbImage, _detections: &[yolov8_detector::Detection]) {
        self.frames += 1;
    }
}

fn two_people() -> Vec<yolov8_detector::Detection> {
    vec![
        det("person", 0.91, BBox::new(2.0, 3.0, 12.5, 20.0)),
        det("person", 0.42, BBox::new(14.0, 1.0, 30.0, 22.0)),
    ]
}

#[test]
fn image_detection_itemizes_each_target() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

    let result = outcome.result().expect("completed");
    assert_eq!(result.source_kind, SourceKind::Image);
    assert_eq!(result.detections.len(), 2);
    let out = result.output_path.clone().expect("annotated image saved");
    assert_eq!(out.file_name().unwrap(), "result_bus.jpg");
    assert!(out.exists());

    let text = fx.log_text();
    assert_eq!(start_markers(&text), 1);
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: image\n"));
    assert!(text.contains("检测到的目标数量: 2\n"));
    assert!(text.contains("  目标 1: person (置信度: 0.91) 位置: [2.0, 3.0, 12.5, 20.0]\n"));
    assert!(text.contains("  目标 2: person (置信度: 0.42)"));
    assert!(text.contains("状态: completed\n"));

    assert_eq!(
        recorder.messages,
        vec![
            format!("开始检测: {}", image.display()),
            "置信度阈值: 0.30".to_string(),
            "正在加载模型...".to_string(),
            "模型加载完成".to_string(),
            "正在进行图片检测...".to_string(),
            "图片检测完成".to_string(),
        ]
    );
}

#[test]
fn threshold_is_applied_by_the_model_layer() {
    let fx = Fixture::new();
    let image = fx.image("street.png");
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.5).unwrap();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut LogListener);

    assert_eq!(outcome.result().unwrap().detections.len(), 1);
    let text = fx.log_text();
    assert!(text.contains("检测到的目标数量: 1\n"));
    assert!(text.contains("置信度阈值: 0.5\n"));
}

#[test]
fn image_without_targets_logs_no_targets_line() {
    let fx = Fixture::new();
    let image = fx.image("empty.png");
    let mut controller = fx.controller(vec![], SyntheticBackend::default());

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    controller.dispatch(&request, &CancelToken::new(), &mut LogListener);

    let text = fx.log_text();
    assert!(text.contains("未检测到目标\n"));
    assert!(!text.contains("目标 1:"));
}

#[test]
fn video_logs_one_aggregate_line_and_writes_output() {
    for frames in [0usize, 1, 5] {
        let fx = Fixture::new();
        let video = fx.video("clip.MP4");
        let backend = SyntheticBackend {
            video_frames: frames,
            ..Default::default()
        };
        let written = Arc::clone(&backend.written);
        let mut controller = fx.controller(two_people(), backend);

        let request = DetectionRequest::new(&fx.model, video.display().to_string(), 0.3).unwrap();
        let mut recorder = Recorder::default();
        let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

        let result = outcome.result().expect("completed");
        assert_eq!(result.source_kind, SourceKind::Video);
        assert_eq!(result.frames_processed, Some(frames as u64));
        assert_eq!(result.total_detections, 2 * frames as u64);
        assert!(result.detections.is_empty());
        assert_eq!(recorder.frames, frames);

        let text = fx.log_text();
        assert_eq!(text.matches("检测摘要: ").count(), 1);
        assert!(text.contains(&format!(
            "视频 {} 总共处理了 {} 帧，检测到 {} 个目标",
            video.display(),
            frames,
            2 * frames
        )));
        assert!(!text.contains("目标 1:"));
        assert_eq!(end_markers(&text), 1);
        assert!(text.contains("检测类型: video\n状态: completed\n"));
        assert!(recorder.messages.contains(&"视频检测完成".to_string()));

        let w = written.lock().unwrap();
        assert_eq!(w.frames, frames);
        if frames > 0 {
            assert!(w.finished);
            assert_eq!(w.size, Some((FRAME_W, FRAME_H, 25.0)));
            assert_eq!(
                result.output_path.as_ref().unwrap().file_name().unwrap(),
                "result_clip.MP4"
            );
        } else {
            // 没有帧就不创建输出
            assert!(w.size.is_none());
            assert!(result.output_path.is_none());
        }
    }
}

#[test]
fn camera_stops_on_cancel_and_logs_aggregate() {
    let fx = Fixture::new();
    let cancel = CancelToken::new();
    let backend = SyntheticBackend {
        camera_available: true,
        cancel_after: Some((4, cancel.clone())),
        ..Default::default()
    };
    let written = Arc::clone(&backend.written);
    let mut controller = fx.controller(two_people(), backend).with_camera_index(1);

    let request = DetectionRequest::new(&fx.model, "Camera", 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &cancel, &mut recorder);

    let result = outcome.result().expect("completed");
    assert_eq!(result.source_kind, SourceKind::Camera);
    assert_eq!(result.source_path, "camera_1");
    assert_eq!(result.frames_processed, Some(4));
    assert_eq!(result.total_detections, 8);
    assert_eq!(recorder.frames, 4);
    assert!(recorder
        .messages
        .contains(&"启动摄像头检测，点击“停止检测”退出".to_string()));

    let text = fx.log_text();
    assert!(text.contains("摄像头检测总共处理了 4 帧，检测到 8 个目标"));
    assert!(text.contains("检测类型: camera\n状态: completed\n"));
    assert_eq!(end_markers(&text), 1);

    // 摄像头不写输出视频
    assert!(written.lock().unwrap().size.is_none());
}

#[test]
fn unsupported_and_missing_sources_skip_model_loading() {
    let fx = Fixture::new();
    let gif = fx.path("anim.gif");
    std::fs::write(&gif, b"GIF89a").unwrap();
    let missing = fx.path("gone.jpg");
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());

    let mut recorder = Recorder::default();
    let request = DetectionRequest::new(&fx.model, gif.display().to_string(), 0.3).unwrap();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);
    assert!(matches!(outcome, Outcome::UnsupportedFormat));
    assert!(recorder.messages.contains(&"不支持的文件格式".to_string()));

    let request = DetectionRequest::new(&fx.model, missing.display().to_string(), 0.3).unwrap();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);
    assert!(matches!(outcome, Outcome::SourceNotExist));
    assert!(recorder.messages.contains(&"输入源不存在".to_string()));

    assert_eq!(fx.loads(), 0);
    let text = fx.log_text();
    assert_eq!(start_markers(&text), 2);
    assert_eq!(end_markers(&text), 2);
    assert!(text.contains("检测类型: unknown\n状态: unsupported_format\n"));
    assert!(text.contains("检测类型: unknown\n状态: source_not_exist\n"));
    assert!(!text.contains("检测时间: "));
}

#[test]
fn detector_errors_become_error_status() {
    let fx = Fixture::new();
    let image = fx.image("bus.png");
    let log = Arc::new(MemoryLog::new());
    let mut controller = Controller::new(
        failing_loader(),
        log.clone(),
        Arc::new(SyntheticBackend::default()),
        fx.options(),
    );

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

    assert!(outcome.is_error());
    assert_eq!(outcome.kind(), Some(SourceKind::Image));
    assert!(outcome.status().starts_with("error: "));
    assert!(recorder
        .messages
        .iter()
        .any(|m| m.starts_with("检测出错: ")));

    let text = log.contents();
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: image\n状态: error: 推理失败: scripted failure\n"));
    assert!(!text.contains("检测时间: "));
}

#[test]
fn video_failure_mid_stream_closes_partial_output() {
    let fx = Fixture::new();
    let video = fx.video("clip.avi");
    let backend = SyntheticBackend {
        video_frames: 5,
        ..Default::default()
    };
    let written = Arc::clone(&backend.written);
    let mut controller = fx.controller_with(failing_after_loader(two_people(), 2), backend);

    let request = DetectionRequest::new(&fx.model, video.display().to_string(), 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

    assert!(outcome.is_error());
    assert_eq!(outcome.kind(), Some(SourceKind::Video));
    assert_eq!(recorder.frames, 2);
    assert!(!recorder.messages.contains(&"视频检测完成".to_string()));

    let text = fx.log_text();
    assert_eq!(start_markers(&text), 1);
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: video\n状态: error: 推理失败: scripted failure\n"));
    assert!(!text.contains("检测摘要: "));

    // 已写入的帧保留, 输出正常关闭
    let w = written.lock().unwrap();
    assert_eq!(w.frames, 2);
    assert!(w.finished);
}

#[test]
fn camera_failure_mid_stream_is_an_error_outcome() {
    let fx = Fixture::new();
    let backend = SyntheticBackend {
        camera_available: true,
        ..Default::default()
    };
    let mut controller = fx.controller_with(failing_after_loader(two_people(), 3), backend);

    let request = DetectionRequest::new(&fx.model, "camera", 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

    assert_eq!(outcome.kind(), Some(SourceKind::Camera));
    assert!(outcome.status().starts_with("error: "));
    assert_eq!(recorder.frames, 3);

    let text = fx.log_text();
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: camera\n状态: error: "));
    assert!(!text.contains("检测摘要: "));
}

#[test]
fn model_panic_is_converted_to_error_status() {
    let fx = Fixture::new();
    let video = fx.video("clip.mov");
    let backend = SyntheticBackend {
        video_frames: 3,
        ..Default::default()
    };
    let mut controller = fx.controller_with(panicking_loader(1), backend);

    let request = DetectionRequest::new(&fx.model, video.display().to_string(), 0.3).unwrap();
    let mut recorder = Recorder::default();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut recorder);

    assert_eq!(outcome.kind(), Some(SourceKind::Video));
    assert_eq!(
        outcome.status(),
        "error: 推理失败: 检测异常退出: scripted panic on call 2"
    );
    assert!(recorder
        .messages
        .iter()
        .any(|m| m.starts_with("检测出错: ")));
    // 出过 panic 的检测器不再复用
    assert_eq!(controller.loaded_model(), None);

    let text = fx.log_text();
    assert_eq!(start_markers(&text), 1);
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: video\n状态: error: "));
}

#[test]
fn repeated_image_detection_logs_same_targets() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());
    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.4).unwrap();

    for _ in 0..2 {
        let outcome = controller.dispatch(&request, &CancelToken::new(), &mut LogListener);
        assert_eq!(outcome.result().unwrap().detections.len(), 2);
    }

    let text = fx.log_text();
    let targets: Vec<&str> = text.lines().filter(|l| l.starts_with("  目标 ")).collect();
    assert_eq!(targets.len(), 4);
    assert_eq!(targets[..2], targets[2..]);
    assert_eq!(end_markers(&text), 2);
}

#[test]
fn camera_open_failure_is_an_error_outcome() {
    let fx = Fixture::new();
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());

    let request = DetectionRequest::new(&fx.model, "camera", 0.3).unwrap();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut LogListener);

    assert_eq!(outcome.kind(), Some(SourceKind::Camera));
    assert!(outcome.status().starts_with("error: 无法打开摄像头 0"));
    assert_eq!(end_markers(&fx.log_text()), 1);
}

#[test]
fn unreadable_image_is_an_error_outcome() {
    let fx = Fixture::new();
    let broken = fx.path("broken.jpg");
    std::fs::write(&broken, b"definitely not a jpeg").unwrap();
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());

    let request = DetectionRequest::new(&fx.model, broken.display().to_string(), 0.3).unwrap();
    let outcome = controller.dispatch(&request, &CancelToken::new(), &mut LogListener);

    assert!(outcome.is_error());
    assert!(outcome.status().contains("无法读取图片"));
    assert_eq!(end_markers(&fx.log_text()), 1);
}

#[test]
fn model_is_reloaded_only_when_path_changes() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let other_model = fx.path("yolov8s.onnx");
    std::fs::write(&other_model, b"onnx").unwrap();
    let mut controller = fx.controller(two_people(), SyntheticBackend::default());
    let source = image.display().to_string();

    for conf in [0.3, 0.5, 0.7] {
        let request = DetectionRequest::new(&fx.model, source.clone(), conf).unwrap();
        assert!(!controller
            .dispatch(&request, &CancelToken::new(), &mut LogListener)
            .is_error());
    }
    assert_eq!(fx.loads(), 1);
    assert_eq!(controller.loaded_model(), Some(fx.model.as_path()));

    let request = DetectionRequest::new(&other_model, source.clone(), 0.3).unwrap();
    controller.dispatch(&request, &CancelToken::new(), &mut LogListener);
    assert_eq!(fx.loads(), 2);
    assert_eq!(controller.loaded_model(), Some(other_model.as_path()));

    controller.reset();
    assert!(controller.loaded_model().is_none());
    let request = DetectionRequest::new(&other_model, source, 0.3).unwrap();
    controller.dispatch(&request, &CancelToken::new(), &mut LogListener);
    assert_eq!(fx.loads(), 3);
}

#[test]
fn invalid_requests_are_rejected_before_dispatch() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let source = image.display().to_string();

    assert!(matches!(
        DetectionRequest::new("", source.clone(), 0.3),
        Err(DetectError::MissingModel)
    ));
    assert!(matches!(
        DetectionRequest::new(fx.path("missing.onnx"), source.clone(), 0.3),
        Err(DetectError::ModelNotFound(_))
    ));
    assert!(matches!(
        DetectionRequest::new(&fx.model, "  ", 0.3),
        Err(DetectError::MissingSource)
    ));
    for conf in [0.0, -0.1, 1.01, f32::NAN] {
        assert!(matches!(
            DetectionRequest::new(&fx.model, source.clone(), conf),
            Err(DetectError::InvalidConfidence(_))
        ));
    }
    assert!(DetectionRequest::new(&fx.model, source, 1.0).is_ok());
}
