use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::info;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// 计时器自动结束回合后发出的事件
#[derive(Debug, Clone, PartialEq)]
pub struct RoundClosed {
    pub game_id: i64,
    pub chat_id: i64,
    pub round_id: i64,
    pub round_index: u32,
    pub next_round_index: u32,
    pub sponsor_end_message: Option<String>,
}

/// 引擎向传输层推送公告的出口
///
/// 推送失败只会被记录，不会回滚已经提交的状态变更。
pub trait NotificationSink: Send + Sync {
    fn round_closed(&self, event: RoundClosed) -> BoxFuture<'_, Result<(), SinkError>>;
}

/// 通过无界通道转交给传输层
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RoundClosed>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RoundClosed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn round_closed(&self, event: RoundClosed) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            self.tx
                .send(event)
                .map_err(|e| format!("notification receiver dropped: round {}", e.0.round_id))?;
            Ok(())
        })
    }
}

/// 只写日志
pub struct LogSink;

impl NotificationSink for LogSink {
    fn round_closed(&self, event: RoundClosed) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async move {
            info!(
                target: "Notify",
                "聊天 {} 第 {} 回合已自动结束，下一回合: {}",
                event.chat_id,
                event.round_index,
                event.next_round_index
            );
            Ok(())
        })
    }
}
