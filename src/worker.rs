//! 后台检测会话
//!
//! 界面线程只通过 `DetectionSession` 启动/停止检测并轮询事件。`Controller`
//! (连同已加载的模型) 在启动时移交给工作线程, 结束时随 `Finished` 一起交还,
//! 同一时刻最多一个检测在运行。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};
use image::RgbImage;

use crate::detection::types::{Detection, DetectionRequest};
use crate::dispatch::{Controller, DispatchListener, Outcome};
use crate::error::{DetectError, Result};

/// 协作式取消标记, 视频/摄像头循环每帧检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 工作线程 → 界面线程
#[derive(Debug)]
pub enum WorkerEvent {
    Log(String),
    /// 最新一帧标注结果
    Frame {
        image: RgbImage,
        detections: usize,
    },
    Finished(Outcome),
}

enum Message {
    Log(String),
    Done(Box<Controller>, Outcome),
}

/// 把调度状态转发到通道
struct ChannelListener {
    events: Sender<Message>,
    frames: Sender<(RgbImage, usize)>,
}

impl DispatchListener for ChannelListener {
    fn status(&mut self, message: &str) {
        log::info!("{}", message);
        let _ = self.events.send(Message::Log(message.to_string()));
    }

    fn frame(&mut self, annotated: &RgbImage, detections: &[Detection]) {
        // 界面跟不上时丢帧
        if let Err(TrySendError::Disconnected(_)) =
            self.frames.try_send((annotated.clone(), detections.len()))
        {
            log::debug!("预览通道已关闭");
        }
    }
}

struct Running {
    events: Receiver<Message>,
    frames: Receiver<(RgbImage, usize)>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

pub struct DetectionSession {
    controller: Option<Box<Controller>>,
    running: Option<Running>,
}

impl DetectionSession {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Some(Box::new(controller)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// 空闲时可访问控制器 (例如修改摄像头编号)
    pub fn controller_mut(&mut self) -> Option<&mut Controller> {
        self.controller.as_deref_mut()
    }

    /// 启动检测; 已有检测在运行时返回 `Busy`
    pub fn start(&mut self, request: DetectionRequest) -> Result<()> {
        if self.running.is_some() {
            return Err(DetectError::Busy);
        }
        let mut controller = self
            .controller
            .take()
            .ok_or_else(|| DetectError::Inference("检测器不可用".into()))?;

        let (events_tx, events_rx) = unbounded();
        let (frames_tx, frames_rx) = bounded(2);
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("detection-worker".into())
            .spawn(move || {
                let mut listener = ChannelListener {
                    events: events_tx.clone(),
                    frames: frames_tx,
                };
                let outcome = controller.dispatch(&request, &token, &mut listener);

                if token.is_cancelled() {
                    listener.status("检测已停止");
                }
                listener.status("检测任务结束");
                let _ = events_tx.send(Message::Done(controller, outcome));
            });

        let handle = match handle {
            Ok(h) => h,
            Err(e) => return Err(DetectError::Io(e)),
        };

        self.running = Some(Running {
            events: events_rx,
            frames: frames_rx,
            cancel,
            handle: Some(handle),
        });
        Ok(())
    }

    /// 请求停止当前检测, 在下一帧生效
    pub fn stop(&self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }

    /// 取出所有待处理事件 (非阻塞)
    pub fn poll(&mut self) -> Vec<WorkerEvent> {
        self.drain(false)
    }

    /// 阻塞直到当前检测结束, 返回期间的全部事件
    pub fn wait(&mut self) -> Vec<WorkerEvent> {
        self.drain(true)
    }

    fn drain(&mut self, block: bool) -> Vec<WorkerEvent> {
        let mut out = Vec::new();
        let Some(running) = self.running.as_mut() else {
            return out;
        };

        // 只保留最新一帧
        if let Some((image, detections)) = running.frames.try_iter().last() {
            out.push(WorkerEvent::Frame { image, detections });
        }

        let mut finished = None;
        loop {
            let msg = if block {
                running.events.recv().map_err(|_| TryRecvError::Disconnected)
            } else {
                running.events.try_recv()
            };
            match msg {
                Ok(Message::Log(line)) => out.push(WorkerEvent::Log(line)),
                Ok(Message::Done(controller, outcome)) => {
                    finished = Some((Some(controller), outcome));
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    finished = Some((
                        None,
                        Outcome::Error {
                            kind: None,
                            message: "检测线程异常退出".into(),
                        },
                    ));
                    break;
                }
            }
        }

        if let Some((controller, outcome)) = finished {
            if let Some(handle) = running.handle.take() {
                let _ = handle.join();
            }
            if controller.is_some() {
                self.controller = controller;
            } else {
                log::error!("❌ 检测线程异常退出, 控制器不可用");
            }
            self.running = None;
            out.push(WorkerEvent::Finished(outcome));
        }
        out
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.as_mut() {
            running.cancel.cancel();
            if let Some(handle) = running.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
