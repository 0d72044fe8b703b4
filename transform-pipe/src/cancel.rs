//! Process-wide interrupt handling for in-flight transforms.
//!
//! A [`CancellationController`] is a cancellation context shared by every
//! transform it is handed to. Arming it registers a single ctrl-c listener;
//! on interrupt the controller cancels all active transforms, waits briefly
//! for them to terminate their subprocesses, then exits the program. This is
//! a hard stop: callers that want to retry must re-run the whole request.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Exit status used when an interrupt aborts the program (128 + SIGINT).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// How long the interrupt path waits for active transforms to tear down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Inner {
    armed: AtomicBool,
    cancelled: watch::Sender<bool>,
    active: AtomicUsize,
    idle: Notify,
}

/// Shared cancellation context for transforms.
#[derive(Clone)]
pub struct CancellationController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CancellationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationController")
            .field("armed", &self.is_armed())
            .field("cancelled", &self.is_cancelled())
            .field("active", &self.active())
            .finish()
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationController {
    /// Creates an unarmed, untriggered controller.
    #[must_use]
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                armed: AtomicBool::new(false),
                cancelled,
                active: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// The process-wide controller.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<CancellationController> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Registers the ctrl-c listener. Idempotent: only the first call on a
    /// controller registers anything.
    ///
    /// Returns `true` if this call registered the listener. Must be called
    /// from within a Tokio runtime; outside one it logs and returns `false`.
    pub fn arm(&self) -> bool {
        if self.inner.armed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.armed.store(false, Ordering::SeqCst);
            tracing::error!("cannot arm interrupt handler outside a Tokio runtime");
            return false;
        };

        let controller = self.clone();
        runtime.spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for interrupt");
                return;
            }
            controller.abort_program().await;
        });
        tracing::debug!("interrupt handler armed");
        true
    }

    /// Returns `true` once [`arm`](Self::arm) has registered the listener.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Cancels every transform using this controller, now and in the future.
    /// Does not exit the program.
    pub fn trigger(&self) {
        self.inner.cancelled.send_replace(true);
    }

    /// Returns `true` once the controller has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
    }

    /// Number of transforms currently registered with this controller.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub(crate) fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.inner.cancelled.subscribe(),
        }
    }

    pub(crate) fn enter(&self) -> ActiveGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Resolves once no transform is registered with this controller.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn abort_program(&self) {
        tracing::warn!("Aborted!");
        self.trigger();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                active = self.active(),
                "transforms still running at exit"
            );
        }
        std::process::exit(INTERRUPT_EXIT_CODE);
    }
}

/// Receiving side of a controller, held by one coordinator.
pub(crate) struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolves when the controller is triggered; never resolves otherwise.
    pub(crate) async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Marks one transform as active for the lifetime of the guard.
pub(crate) struct ActiveGuard {
    inner: Arc<Inner>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn arming_twice_registers_once() {
        let controller = CancellationController::new();
        assert!(controller.arm());
        assert!(!controller.arm());
        assert!(controller.is_armed());
        assert!(!controller.is_cancelled());
    }

    #[test]
    fn arming_outside_runtime_is_refused() {
        let controller = CancellationController::new();
        assert!(!controller.arm());
        assert!(!controller.is_armed());
    }

    #[tokio::test]
    async fn token_observes_trigger() {
        let controller = CancellationController::new();
        let mut token = controller.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        controller.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(controller.is_cancelled());
    }

    #[tokio::test]
    async fn token_created_after_trigger_resolves_immediately() {
        let controller = CancellationController::new();
        controller.trigger();
        let mut token = controller.token();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_follows_guards() {
        let controller = CancellationController::new();
        let guard = controller.enter();
        assert_eq!(controller.active(), 1);

        let waiting = controller.clone();
        let waiter = tokio::spawn(async move { waiting.wait_idle().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(controller.active(), 0);
    }
}
