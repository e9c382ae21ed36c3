use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};

use crate::debug;

struct TimerEntry {
    generation: u64,
    cancel: watch::Sender<bool>,
    wake: Arc<Notify>,
}

/// 回合计时器登记表 (round id -> 正在运行的计时任务)
///
/// 每个引擎实例持有一份。同一回合至多一个计时器：重新布置前总会取消旧的，
/// 任务结束或被取消时立即移除登记。
pub struct RoundTimers {
    tasks: Mutex<HashMap<i64, TimerEntry>>,
    next_generation: AtomicU64,
}

impl Default for RoundTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTimers {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, TimerEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 为回合布置计时任务，已有的旧任务会先被取消
    pub fn arm<F, Fut>(self: &Arc<Self>, round_id: i64, task_gen: F)
    where
        F: FnOnce(TimerTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());

        let task = task_gen(TimerTicket {
            round_id,
            cancel: cancel_rx,
            wake: wake.clone(),
        });

        // 先登记再启动，保证任务结束时的 release 一定能看到自己的登记
        {
            let mut tasks = self.lock();
            let entry = TimerEntry {
                generation,
                cancel: cancel_tx,
                wake,
            };
            if let Some(prev) = tasks.insert(round_id, entry) {
                let _ = prev.cancel.send(true);
            }
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            task.await;
            registry.release(round_id, generation);
        });
    }

    /// 取消回合的计时器，返回是否存在
    pub fn cancel(&self, round_id: i64) -> bool {
        match self.lock().remove(&round_id) {
            Some(entry) => {
                let _ = entry.cancel.send(true);
                debug!(target: "Timer", "回合 {} 的计时器已取消", round_id);
                true
            }
            None => false,
        }
    }

    /// 提前唤醒处于轮询等待中的计时器
    pub fn nudge(&self, round_id: i64) {
        if let Some(entry) = self.lock().get(&round_id) {
            entry.wake.notify_one();
        }
    }

    pub fn is_armed(&self, round_id: i64) -> bool {
        self.lock().contains_key(&round_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let mut tasks = self.lock();
        let count = tasks.len();
        for (_, entry) in tasks.drain() {
            let _ = entry.cancel.send(true);
        }
        debug!(target: "Timer", "已清理 {} 个回合计时器", count);
    }

    /// 只移除同一代的登记，避免误删之后重新布置的计时器
    fn release(&self, round_id: i64, generation: u64) {
        let mut tasks = self.lock();
        if tasks
            .get(&round_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            tasks.remove(&round_id);
        }
    }
}

/// 交给计时任务的取消 / 唤醒句柄
pub struct TimerTicket {
    round_id: i64,
    cancel: watch::Receiver<bool>,
    wake: Arc<Notify>,
}

impl TimerTicket {
    pub fn round_id(&self) -> i64 {
        self.round_id
    }

    /// 发送端被丢弃同样视为取消
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    /// 睡眠指定时长，期间被取消则返回 `false`
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let elapsed = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = wait_cancelled(&mut self.cancel) => false,
        };
        elapsed && !self.is_cancelled()
    }

    /// 等待一个轮询间隔或被 [`RoundTimers::nudge`] 提前唤醒，期间被取消则返回 `false`
    pub async fn wait_poll(&mut self, interval: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let woke = tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            _ = self.wake.notified() => true,
            _ = wait_cancelled(&mut self.cancel) => false,
        };
        woke && !self.is_cancelled()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn completed_task_releases_registration() {
        let timers = Arc::new(RoundTimers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timers.arm(7, move |mut ticket| async move {
            if ticket.sleep(Duration::from_secs(5)).await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(timers.is_armed(7));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let timers = Arc::new(RoundTimers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timers.arm(1, move |mut ticket| async move {
            if ticket.sleep(Duration::from_secs(60)).await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(timers.cancel(1));
        assert!(!timers.is_armed(1));
        assert!(!timers.cancel(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous_timer() {
        let timers = Arc::new(RoundTimers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = fired.clone();
            timers.arm(9, move |mut ticket| async move {
                if ticket.sleep(Duration::from_secs(10)).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nudge_wakes_poll_early() {
        let timers = Arc::new(RoundTimers::new());
        let polls = Arc::new(AtomicUsize::new(0));

        let counter = polls.clone();
        timers.arm(3, move |mut ticket| async move {
            if ticket.wait_poll(Duration::from_secs(600)).await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        timers.nudge(3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(3));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let timers = Arc::new(RoundTimers::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for round_id in 1..=4 {
            let counter = fired.clone();
            timers.arm(round_id, move |mut ticket| async move {
                if ticket.sleep(Duration::from_secs(30)).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(timers.len(), 4);

        timers.shutdown();
        assert!(timers.is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
