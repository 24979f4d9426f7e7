//! 事件出口
//!
//! EventSink 包装 mpsc 发送端：按调用顺序投递、记录已发事件（供重放缓存），
//! done 之后拒绝一切事件；接收端被丢弃（客户端断开）后 emit 返回 false，disconnected() 完成。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::stream::ProtocolEvent;

#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProtocolEvent>,
    closed: AtomicBool,
    emitted: Mutex<Vec<ProtocolEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ProtocolEvent>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
            emitted: Mutex::new(Vec::new()),
        }
    }

    /// 创建 sink 与对应的接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// 投递一个事件；done 之后或客户端已断开时返回 false
    pub fn emit(&self, event: ProtocolEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(kind = event.kind(), "event after done dropped");
            return false;
        }
        if event.is_terminal() {
            self.closed.store(true, Ordering::SeqCst);
        }
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(event.clone());
        }
        self.tx.send(event).is_ok()
    }

    /// 是否已发出 done
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    /// 接收端被丢弃时完成
    pub async fn disconnected(&self) {
        self.tx.closed().await
    }

    /// 已发出事件的快照
    pub fn emitted(&self) -> Vec<ProtocolEvent> {
        self.emitted
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}
