//! Server-side liveness watchdog.
//!
//! Every session owns a [`HeartbeatMonitor`]. Any inbound control line counts
//! as activity, and so does every chunk of frame payload moved through a
//! [`Progress`] wrapper, so a stalled transfer is reaped like a silent peer.
//! The watchdog wakes once per interval; when the session has been
//! silent for at least one interval the miss counter goes up, and reaching
//! `max_misses` consecutive misses expires the session. With the defaults
//! (25 s, 2 misses) a silent peer is dropped 50 s after its last line.

use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::Instant,
};

/// Watchdog timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub max_misses: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            max_misses: 2,
        }
    }
}

/// Outcome of one watchdog check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Missed(u32),
    Expired,
}

/// Last-activity timestamp and consecutive-miss counter of one session
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    last_activity: Instant,
    misses: u32,
}

impl HeartbeatState {
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            misses: 0,
        }
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.misses = 0;
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    /// Evaluate the session at `now`.
    pub fn check(&mut self, now: Instant, config: &HeartbeatConfig) -> Verdict {
        if now.saturating_duration_since(self.last_activity) < config.interval {
            return Verdict::Alive;
        }
        self.misses += 1;
        if self.misses >= config.max_misses {
            Verdict::Expired
        } else {
            Verdict::Missed(self.misses)
        }
    }
}

/// Per-session watchdog shared by the read loop, the writer task and the timer
#[derive(Clone)]
pub struct HeartbeatMonitor {
    state: Arc<Mutex<HeartbeatState>>,
    config: HeartbeatConfig,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeartbeatState::new(Instant::now()))),
            config,
        }
    }

    fn state(&self) -> MutexGuard<'_, HeartbeatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_activity(&self) {
        self.state().record_activity(Instant::now());
    }

    /// Wrap a reader or writer so that each chunk it moves counts as activity.
    pub fn progress<T>(&self, inner: T) -> Progress<T> {
        Progress {
            inner,
            monitor: self.clone(),
        }
    }

    /// Resolve once the session has missed `max_misses` consecutive checks.
    pub async fn expired(&self) {
        loop {
            tokio::time::sleep(self.config.interval).await;
            let verdict = self.state().check(Instant::now(), &self.config);
            match verdict {
                Verdict::Alive => {}
                Verdict::Missed(misses) => {
                    tracing::debug!("Heartbeat missed ({}/{})", misses, self.config.max_misses);
                }
                Verdict::Expired => return,
            }
        }
    }
}

/// Reader or writer that reports every non-empty transfer to a [`HeartbeatMonitor`]
pub struct Progress<T> {
    inner: T,
    monitor: HeartbeatMonitor,
}

impl<T: AsyncRead + Unpin> AsyncRead for Progress<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.monitor.record_activity();
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Progress<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(written)) if written > 0) {
            this.monitor.record_activity();
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config() -> HeartbeatConfig {
        HeartbeatConfig::default()
    }

    #[test]
    fn test_two_consecutive_misses_expire() {
        // テスト項目: 2 回連続で無通信と判定されると期限切れになる
        // given (前提条件):
        let start = Instant::now();
        let mut state = HeartbeatState::new(start);

        // when (操作):
        let first = state.check(start + Duration::from_secs(25), &config());
        let second = state.check(start + Duration::from_secs(50), &config());

        // then (期待する結果):
        assert_eq!(first, Verdict::Missed(1));
        assert_eq!(second, Verdict::Expired);
    }

    #[test]
    fn test_activity_resets_miss_counter() {
        // テスト項目: 何らかの行を受信するとミスカウンタがリセットされる
        // given (前提条件):
        let start = Instant::now();
        let mut state = HeartbeatState::new(start);
        state.check(start + Duration::from_secs(25), &config());

        // when (操作):
        state.record_activity(start + Duration::from_secs(30));
        let verdict = state.check(start + Duration::from_secs(50), &config());

        // then (期待する結果):
        assert_eq!(verdict, Verdict::Alive);
        assert_eq!(state.misses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_progress_postpones_expiry() {
        // テスト項目: Progress 経由でペイロードが流れている間は期限切れにならない
        // given (前提条件):
        let monitor = HeartbeatMonitor::new(config());
        let start = Instant::now();
        let watchdog = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.expired().await }
        });
        let (mut peer, local) = tokio::io::duplex(64);
        let mut reader = monitor.progress(local);

        // when (操作): 40s 時点で 1 チャンクだけ受信し、その後は無通信
        tokio::time::sleep(Duration::from_secs(40)).await;
        peer.write_all(b"chunk").await.unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        watchdog.await.unwrap();

        // then (期待する結果): 50s は生存、75s と 100s でミス
        assert_eq!(n, 5);
        assert_eq!(start.elapsed(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transfer_still_expires() {
        // テスト項目: 途中で止まった転送は通常の無通信と同じく期限切れになる
        // given (前提条件):
        let monitor = HeartbeatMonitor::new(config());
        let start = Instant::now();
        let (mut peer, local) = tokio::io::duplex(64);
        let mut reader = monitor.progress(local);
        peer.write_all(b"partial").await.unwrap();
        let mut buf = [0u8; 16];
        reader.read(&mut buf).await.unwrap();

        // when (操作): 残りのペイロードを待ち続ける
        let outcome = tokio::select! {
            _ = reader.read(&mut buf) => "read",
            _ = monitor.expired() => "expired",
        };

        // then (期待する結果):
        assert_eq!(outcome, "expired");
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_expires_after_threshold() {
        // テスト項目: 無通信のセッションは interval × max_misses 後に期限切れになる
        // given (前提条件):
        let monitor = HeartbeatMonitor::new(config());
        let start = Instant::now();

        // when (操作):
        monitor.expired().await;

        // then (期待する結果):
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_postpones_expiry() {
        // テスト項目: 途中で活動があると期限切れが後ろにずれる
        // given (前提条件):
        let monitor = HeartbeatMonitor::new(config());
        let start = Instant::now();
        let watchdog = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.expired().await }
        });

        // when (操作):
        tokio::time::sleep(Duration::from_secs(20)).await;
        monitor.record_activity();
        watchdog.await.unwrap();

        // then (期待する結果): 25s は生存、50s と 75s でミス
        assert_eq!(start.elapsed(), Duration::from_secs(75));
    }
}
