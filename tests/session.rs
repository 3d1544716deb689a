mod common;

use std::time::{Duration, Instant};

use common::*;
use yolov8_detector::{BBox, DetectError, DetectionRequest, DetectionSession, Outcome, WorkerEvent};

fn finished(events: &[WorkerEvent]) -> Option<&Outcome> {
    events.iter().find_map(|e| match e {
        WorkerEvent::Finished(outcome) => Some(outcome),
        _ => None,
    })
}

fn log_lines(events: &[WorkerEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Log(line) => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn image_run_reports_progress_and_finishes() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let controller = fx.controller(
        vec![det("person", 0.8, BBox::new(1.0, 1.0, 10.0, 10.0))],
        SyntheticBackend::default(),
    );
    let mut session = DetectionSession::new(controller);

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    session.start(request).unwrap();
    let events = session.wait();

    assert!(!session.is_running());
    let outcome = finished(&events).expect("finished event");
    assert_eq!(outcome.result().unwrap().detections.len(), 1);

    let lines = log_lines(&events);
    assert!(lines.contains(&"正在加载模型..."));
    assert!(lines.contains(&"图片检测完成"));
    assert_eq!(lines.last(), Some(&"检测任务结束"));
    assert!(!lines.contains(&"检测已停止"));

    // 控制器已交还, 可以访问
    let controller = session.controller_mut().expect("controller restored");
    assert_eq!(controller.loaded_model(), Some(fx.model.as_path()));
}

#[test]
fn second_start_is_rejected_while_running() {
    let fx = Fixture::new();
    let backend = SyntheticBackend {
        camera_available: true,
        camera_delay: Some(Duration::from_millis(5)),
        ..Default::default()
    };
    let mut session = DetectionSession::new(fx.controller(vec![], backend));

    let request = DetectionRequest::new(&fx.model, "camera", 0.3).unwrap();
    session.start(request.clone()).unwrap();
    assert!(session.is_running());
    assert!(session.controller_mut().is_none());
    assert!(matches!(session.start(request), Err(DetectError::Busy)));

    session.stop();
    let events = session.wait();
    let outcome = finished(&events).expect("finished event");
    assert_eq!(outcome.status(), "completed");

    let lines = log_lines(&events);
    assert!(lines.contains(&"检测已停止"));
    assert_eq!(lines.last(), Some(&"检测任务结束"));

    // 一次调度只有一个结束标记
    let text = fx.log_text();
    assert_eq!(start_markers(&text), 1);
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: camera\n状态: completed\n"));
}

#[test]
fn poll_delivers_frames_and_restores_controller() {
    let fx = Fixture::new();
    let backend = SyntheticBackend {
        camera_available: true,
        camera_delay: Some(Duration::from_millis(2)),
        ..Default::default()
    };
    let mut session = DetectionSession::new(fx.controller(vec![], backend));
    let request = DetectionRequest::new(&fx.model, "camera", 0.3).unwrap();
    session.start(request).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut got_frame = false;
    while !got_frame && Instant::now() < deadline {
        got_frame = session
            .poll()
            .iter()
            .any(|e| matches!(e, WorkerEvent::Frame { .. }));
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(got_frame);

    session.stop();
    let mut outcome = None;
    while outcome.is_none() && Instant::now() < deadline {
        for event in session.poll() {
            if let WorkerEvent::Finished(o) = event {
                outcome = Some(o);
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(outcome, Some(Outcome::Completed(_))));
    assert!(!session.is_running());
    assert!(session.controller_mut().is_some());

    // 会话可以再次启动, 模型不重新加载
    let image = fx.image("bus.jpg");
    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    session.start(request).unwrap();
    let events = session.wait();
    assert!(finished(&events).is_some());
    assert_eq!(fx.loads(), 1);
}

#[test]
fn errors_are_reported_through_finished() {
    let fx = Fixture::new();
    let mut session = DetectionSession::new(fx.controller(vec![], SyntheticBackend::default()));

    let request = DetectionRequest::new(&fx.model, "camera", 0.3).unwrap();
    session.start(request).unwrap();
    let events = session.wait();

    let outcome = finished(&events).expect("finished event");
    assert!(outcome.is_error());
    assert!(log_lines(&events)
        .iter()
        .any(|l| l.starts_with("检测出错: ")));
    assert!(fx.log_text().contains("状态: error: "));
    assert!(session.controller_mut().is_some());
}

#[test]
fn wait_and_poll_are_empty_when_idle() {
    let fx = Fixture::new();
    let mut session = DetectionSession::new(fx.controller(vec![], SyntheticBackend::default()));
    assert!(session.poll().is_empty());
    assert!(session.wait().is_empty());
    session.stop();
    assert!(!session.is_running());
}

#[test]
fn worker_panic_still_writes_end_marker() {
    let fx = Fixture::new();
    let image = fx.image("bus.jpg");
    let mut session =
        DetectionSession::new(fx.controller_with(panicking_loader(0), SyntheticBackend::default()));

    let request = DetectionRequest::new(&fx.model, image.display().to_string(), 0.3).unwrap();
    session.start(request).unwrap();
    let events = session.wait();

    let outcome = finished(&events).expect("finished event");
    assert!(outcome.is_error());
    assert_eq!(log_lines(&events).last(), Some(&"检测任务结束"));

    let text = fx.log_text();
    assert_eq!(start_markers(&text), 1);
    assert_eq!(end_markers(&text), 1);
    assert!(text.contains("检测类型: image\n状态: error: "));

    // 控制器交还, 但检测器已丢弃
    let controller = session.controller_mut().expect("controller restored");
    assert_eq!(controller.loaded_model(), None);
}
