//! Leading-edge resize debounce.
//!
//! Every resize frame makes the remote side reallocate its pty, so viewport
//! changes are coalesced: the first trigger latches a deadline and any trigger
//! arriving before it elapses is dropped. The deadline is never pushed back.

use std::time::Duration;

use dashterm_protocol::{Resize, encode_resize};
use tokio::time::Instant;

use crate::surface::Surface;
use crate::transport::FrameSink;

pub struct ResizeCoordinator {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ResizeCoordinator {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Latch a resize. Returns `false` when one is already pending.
    pub fn trigger(&mut self) -> bool {
        if self.deadline.is_some() {
            tracing::debug!("resize already pending, coalescing");
            return false;
        }
        self.deadline = Some(Instant::now() + self.delay);
        true
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear the latch without sending anything.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Resolves once the pending deadline passes; never resolves when idle.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Measure the surface and send one resize frame.
    ///
    /// The latch is cleared whatever happens. Nothing touches the surface once
    /// it is detached, and measurement or send failures are only logged.
    pub fn fire<S, F>(&mut self, surface: &mut S, sink: &F) -> Option<Resize>
    where
        S: Surface + ?Sized,
        F: FrameSink + ?Sized,
    {
        self.deadline = None;

        if !surface.is_attached() {
            tracing::debug!("surface detached, dropping resize");
            return None;
        }

        let size = match surface.fit() {
            Ok(Some(size)) => size,
            Ok(None) => {
                tracing::debug!("surface proposed no dimensions");
                return None;
            }
            Err(e) => {
                tracing::warn!("resize computation failed: {e}");
                return None;
            }
        };

        match sink.send_frame(encode_resize(size.rows, size.cols)) {
            Ok(()) => {
                tracing::debug!("sent resize {}x{}", size.rows, size.cols);
                Some(size)
            }
            Err(e) => {
                tracing::debug!("resize not sent: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceError;

    const DELAY: Duration = Duration::from_millis(1500);

    #[derive(Default)]
    struct Frames(parking_lot::Mutex<Vec<bytes::Bytes>>);

    impl FrameSink for Frames {
        fn send_frame(&self, frame: bytes::Bytes) -> crate::Result<()> {
            self.0.lock().push(frame);
            Ok(())
        }
    }

    struct Disconnected;

    impl FrameSink for Disconnected {
        fn send_frame(&self, _frame: bytes::Bytes) -> crate::Result<()> {
            Err(crate::Error::NotConnected)
        }
    }

    struct Recorder {
        size: Option<Resize>,
        fail: bool,
        attached: bool,
        fits: usize,
    }

    impl Recorder {
        fn new(rows: u16, cols: u16) -> Self {
            Self {
                size: Some(Resize { rows, cols }),
                fail: false,
                attached: true,
                fits: 0,
            }
        }
    }

    impl Surface for Recorder {
        fn write(&mut self, _data: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn fit(&mut self) -> Result<Option<Resize>, SurfaceError> {
            self.fits += 1;
            if self.fail {
                return Err(SurfaceError::NotLaidOut);
            }
            Ok(self.size)
        }

        fn is_attached(&self) -> bool {
            self.attached
        }

        fn dispose(&mut self) {
            self.attached = false;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_inside_window_coalesce() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let mut surface = Recorder::new(24, 80);
        let sink = Frames::default();

        assert!(coordinator.trigger());
        for _ in 0..9 {
            tokio::time::advance(Duration::from_millis(100)).await;
            assert!(!coordinator.trigger());
        }

        coordinator.elapsed().await;
        assert_eq!(
            coordinator.fire(&mut surface, &sink),
            Some(Resize { rows: 24, cols: 80 })
        );

        let frames = sink.0.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\x01{\"Rows\":24,\"Cols\":80}");
        assert!(!coordinator.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_trigger_does_not_extend_deadline() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let start = Instant::now();
        coordinator.trigger();
        tokio::time::advance(Duration::from_millis(1000)).await;
        coordinator.trigger();
        assert_eq!(coordinator.deadline(), Some(start + DELAY));

        coordinator.elapsed().await;
        let waited = Instant::now() - start;
        assert!(waited >= DELAY && waited < DELAY + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_triggers_each_send() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let mut surface = Recorder::new(30, 100);
        let sink = Frames::default();

        for _ in 0..4 {
            assert!(coordinator.trigger());
            coordinator.elapsed().await;
            coordinator.fire(&mut surface, &sink);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        assert_eq!(sink.0.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_sends_nothing() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        coordinator.trigger();
        coordinator.cancel();
        assert!(!coordinator.is_pending());

        let idle = tokio::time::timeout(Duration::from_secs(10), coordinator.elapsed()).await;
        assert!(idle.is_err());
    }

    #[test]
    fn test_detached_surface_is_not_touched() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let mut surface = Recorder::new(24, 80);
        surface.dispose();
        let sink = Frames::default();

        assert_eq!(coordinator.fire(&mut surface, &sink), None);
        assert_eq!(surface.fits, 0);
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_fit_failure_is_swallowed_and_latch_cleared() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let mut surface = Recorder::new(24, 80);
        surface.fail = true;
        let sink = Frames::default();

        assert!(coordinator.deadline.is_none());
        coordinator.deadline = Some(Instant::now());
        assert_eq!(coordinator.fire(&mut surface, &sink), None);
        assert!(!coordinator.is_pending());
        assert!(sink.0.lock().is_empty());

        surface.fail = false;
        surface.size = None;
        coordinator.deadline = Some(Instant::now());
        assert_eq!(coordinator.fire(&mut surface, &sink), None);
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_send_failure_clears_latch() {
        let mut coordinator = ResizeCoordinator::new(DELAY);
        let mut surface = Recorder::new(24, 80);
        coordinator.deadline = Some(Instant::now());
        assert_eq!(coordinator.fire(&mut surface, &Disconnected), None);
        assert!(!coordinator.is_pending());
        assert_eq!(surface.fits, 1);
    }
}
