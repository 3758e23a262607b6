//! Singleflight 组
//!
//! 合并对同一个 key 的并发加载：第一个调用者执行实际操作，
//! 其余调用者等待并共享结果。

use keel_errors::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

type CallMap<T> = Mutex<HashMap<String, broadcast::Sender<Result<T, String>>>>;

/// 执行者退出前摘除在途标记的守卫。
///
/// 执行者 future 被取消时 Drop 兜底：摘除标记并丢弃 sender，
/// 等待者会收到通道关闭错误而不是永远挂起。
struct FlightGuard<'a, T> {
    calls: &'a CallMap<T>,
    key: &'a str,
    done: bool,
}

impl<'a, T> FlightGuard<'a, T> {
    fn take(mut self) -> Option<broadcast::Sender<Result<T, String>>> {
        self.done = true;
        self.calls.lock().remove(self.key)
    }
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.calls.lock().remove(self.key);
        }
    }
}

/// Singleflight 组
#[derive(Clone)]
pub(crate) struct SingleflightGroup<T> {
    calls: Arc<CallMap<T>>,
}

enum Role<T> {
    Leader,
    Waiter(broadcast::Receiver<Result<T, String>>),
}

impl<T: Clone + Send + 'static> SingleflightGroup<T> {
    pub(crate) fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 执行操作；同一个 key 已有操作在途时等待其结果。
    ///
    /// 执行者拿到的是原始错误；等待者拿到的是错误文本重新包装后的
    /// Internal 错误（结果跨任务广播，错误本身不可克隆）。
    pub(crate) async fn run<F, Fut>(&self, key: &str, f: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        // 订阅与登记在同一次加锁内完成，保证一个 key 只有一个执行者
        let role = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(tx) => Role::Waiter(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    calls.insert(key.to_string(), tx);
                    Role::Leader
                }
            }
        };

        if let Role::Waiter(mut rx) = role {
            return match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(AppError::internal(e)),
                Err(_) => Err(AppError::internal("in-flight load dropped before completing")),
            };
        }

        let guard = FlightGuard {
            calls: self.calls.as_ref(),
            key,
            done: false,
        };

        let result = f().await;

        // 先摘除再广播：摘除之后新来的调用会开启新一轮，
        // 不会订阅到已经发送过结果的通道上。
        if let Some(tx) = guard.take() {
            let broadcast_result = match &result {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send(broadcast_result);
        }

        result
    }
}
