// 生命周期事件 - 请求各阶段的通知
//
// 调用方可以注册任意回调（未注册的回调调用时为空操作），
// 也可以把所有事件转发到一个 mpsc 通道中统一消费。

use std::fmt;
use tokio::sync::mpsc;

/// 请求生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// 请求通过校验，开始处理
    Start,
    /// 下载进度（0-100，单调不减）
    Progress(u8),
    /// 图片字节已就绪（下载完成或缓存命中）
    Downloaded,
    /// 图片已交给渲染端
    Loaded,
    /// 错误信息
    Error(String),
    /// 请求结束（每个请求恰好一次）
    End,
}

type Handler = Box<dyn Fn() + Send + Sync>;
type ProgressHandler = Box<dyn Fn(u8) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(&str) + Send + Sync>;

/// 生命周期回调集合
///
/// # 示例
/// ```
/// use pic_loader::services::loader::LifecycleCallbacks;
///
/// let callbacks = LifecycleCallbacks::new()
///     .on_download_progress_changed(|p| println!("progress {}%", p))
///     .on_error(|msg| eprintln!("error: {}", msg));
/// ```
#[derive(Default)]
pub struct LifecycleCallbacks {
    on_start: Option<Handler>,
    on_download_progress_changed: Option<ProgressHandler>,
    on_downloaded: Option<Handler>,
    on_loaded: Option<Handler>,
    on_error: Option<ErrorHandler>,
    on_end: Option<Handler>,
    events: Option<mpsc::UnboundedSender<LoadEvent>>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建把所有事件转发到通道的回调集合
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callbacks = Self {
            events: Some(tx),
            ..Self::default()
        };
        (callbacks, rx)
    }

    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_download_progress_changed(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_download_progress_changed = Some(Box::new(f));
        self
    }

    pub fn on_downloaded(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_downloaded = Some(Box::new(f));
        self
    }

    pub fn on_loaded(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_loaded = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    /// 分发事件到对应回调和事件通道
    pub fn emit(&self, event: LoadEvent) {
        let handler = match &event {
            LoadEvent::Start => self.on_start.as_ref(),
            LoadEvent::Downloaded => self.on_downloaded.as_ref(),
            LoadEvent::Loaded => self.on_loaded.as_ref(),
            LoadEvent::End => self.on_end.as_ref(),
            LoadEvent::Progress(progress) => {
                if let Some(f) = &self.on_download_progress_changed {
                    f(*progress);
                }
                None
            }
            LoadEvent::Error(message) => {
                if let Some(f) = &self.on_error {
                    f(message);
                }
                None
            }
        };

        if let Some(f) = handler {
            f();
        }

        if let Some(tx) = &self.events {
            // 接收端已关闭说明调用方不再关心事件
            let _ = tx.send(event);
        }
    }
}

impl fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field(
                "on_download_progress_changed",
                &self.on_download_progress_changed.is_some(),
            )
            .field("on_downloaded", &self.on_downloaded.is_some())
            .field("on_loaded", &self.on_loaded.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unset_handlers_are_noop() {
        let callbacks = LifecycleCallbacks::new();
        callbacks.emit(LoadEvent::Start);
        callbacks.emit(LoadEvent::Progress(50));
        callbacks.emit(LoadEvent::Error("boom".into()));
        callbacks.emit(LoadEvent::End);
    }

    #[test]
    fn test_handlers_receive_events() {
        let starts = Arc::new(AtomicU32::new(0));
        let progress = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let callbacks = LifecycleCallbacks::new()
            .on_start({
                let starts = starts.clone();
                move || {
                    starts.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_download_progress_changed({
                let progress = progress.clone();
                move |p| progress.lock().unwrap().push(p)
            })
            .on_error({
                let errors = errors.clone();
                move |m| errors.lock().unwrap().push(m.to_string())
            });

        callbacks.emit(LoadEvent::Start);
        callbacks.emit(LoadEvent::Progress(10));
        callbacks.emit(LoadEvent::Progress(100));
        callbacks.emit(LoadEvent::Error("Url is not correct".into()));
        callbacks.emit(LoadEvent::Loaded);

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(*progress.lock().unwrap(), vec![10, 100]);
        assert_eq!(*errors.lock().unwrap(), vec!["Url is not correct"]);
    }

    #[tokio::test]
    async fn test_channel_forwards_events_in_order() {
        let (callbacks, mut rx) = LifecycleCallbacks::channel();

        callbacks.emit(LoadEvent::Start);
        callbacks.emit(LoadEvent::Downloaded);
        callbacks.emit(LoadEvent::End);
        drop(callbacks);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![LoadEvent::Start, LoadEvent::Downloaded, LoadEvent::End]
        );
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (callbacks, rx) = LifecycleCallbacks::channel();
        drop(rx);
        callbacks.emit(LoadEvent::Start);
    }
}
