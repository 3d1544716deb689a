//! 检测结果日志 (out.txt)
//!
//! 只追加的文本日志: 进程启动时截断并写入一次表头, 之后每次写入都是
//! 独立的 打开-追加-关闭 周期, 不持有长期文件句柄。两次检测之间崩溃不会破坏已有记录。

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};

use crate::detection::types::{DetectionResult, SourceKind};

/// 默认日志文件
pub const DEFAULT_LOG_FILE: &str = "out.txt";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 日志写入接口
///
/// 每次调用写入一个完整的文本块。实现必须是只追加的。
pub trait LogSink: Send + Sync {
    fn write_block(&self, text: &str) -> std::io::Result<()>;
}

/// 基于文件的日志
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    /// 截断日志文件并写入运行表头, 每个进程调用一次
    pub fn init(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let mut f = File::create(&path)?;
        f.write_all(format_run_marker(&Local::now()).as_bytes())?;
        Ok(Self { path })
    }

    /// 打开已有日志 (不截断)
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLog {
    fn write_block(&self, text: &str) -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(text.as_bytes())
    }
}

/// 内存日志, 用于测试和界面回显
#[derive(Debug, Default)]
pub struct MemoryLog {
    blocks: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<String> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn contents(&self) -> String {
        self.blocks().concat()
    }
}

impl LogSink for MemoryLog {
    fn write_block(&self, text: &str) -> std::io::Result<()> {
        let mut blocks = self
            .blocks
            .lock()
            .map_err(|_| std::io::Error::other("memory log poisoned"))?;
        blocks.push(text.to_string());
        Ok(())
    }
}

/// 写入日志块; 失败只记录告警, 不中断检测
pub fn append(sink: &dyn LogSink, text: &str) {
    if let Err(e) = sink.write_block(text) {
        log::warn!("写入检测结果日志失败: {}", e);
    }
}

pub fn timestamp(t: &DateTime<Local>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// 运行表头
pub fn format_run_marker(t: &DateTime<Local>) -> String {
    format!(
        "YOLOv8 目标检测结果记录\n开始时间: {}\n{}\n",
        timestamp(t),
        "=".repeat(50)
    )
}

/// 检测开始标记
pub fn format_start_marker(t: &DateTime<Local>, source: &str, conf: f32) -> String {
    format!(
        "\n[{}] 开始检测\n输入源: {}\n置信度阈值: {}\n",
        timestamp(t),
        source,
        conf
    )
}

/// 检测结束标记, 每次调度恰好一个
pub fn format_end_marker(t: &DateTime<Local>, kind: Option<SourceKind>, status: &str) -> String {
    format!(
        "[{}] 检测结束\n检测类型: {}\n状态: {}\n{}\n",
        timestamp(t),
        kind.map(|k| k.as_str()).unwrap_or("unknown"),
        status,
        "-".repeat(30)
    )
}

/// 检测结果块
///
/// 图片: 逐目标列出 (置信度两位小数, 坐标一位小数), 无目标时写 `未检测到目标`;
/// 视频/摄像头: 只写一行汇总。
pub fn format_detection_block(result: &DetectionResult) -> String {
    let sep = "=".repeat(50);
    let mut s = String::new();
    s.push_str(&format!("\n{}\n", sep));
    s.push_str(&format!("检测时间: {}\n", timestamp(&result.timestamp)));
    s.push_str(&format!("检测类型: {}\n", result.source_kind));
    s.push_str(&format!("源文件: {}\n", result.source_path));

    if let Some(summary) = result.summary() {
        s.push_str(&format!("检测摘要: {}\n", summary));
    }

    if result.source_kind == SourceKind::Image && !result.detections.is_empty() {
        s.push_str(&format!("检测到的目标数量: {}\n", result.detections.len()));
        s.push_str("详细检测结果:\n");
        for (i, det) in result.detections.iter().enumerate() {
            s.push_str(&format!(
                "  目标 {}: {} (置信度: {:.2}) 位置: [{:.1}, {:.1}, {:.1}, {:.1}]\n",
                i + 1,
                det.class_name,
                det.confidence,
                det.bbox.x1,
                det.bbox.y1,
                det.bbox.x2,
                det.bbox.y2
            ));
        }
    } else {
        s.push_str("未检测到目标\n");
    }

    s.push_str(&format!("{}\n", sep));
    s
}
