//! Cooperative cancellation over a watch channel.
//!
//! Child tokens observe their parent: cancelling a parent cancels every
//! descendant, while a child can be cancelled on its own without touching
//! the parent. Handlers poll `is_cancelled` at loop boundaries and await
//! `cancelled()` inside `select!` arms around I/O.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when this token (or an ancestor) is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Derive a token that is cancelled when this one is.
    ///
    /// Requires a running tokio runtime (a forwarder task watches the
    /// parent).
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        let child_tx = Arc::clone(&child.tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {
                    let _ = child_tx.send(true);
                }
                _ = child_tx.closed() => {}
            }
        });
        child
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_is_observed() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Must resolve immediately.
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_children() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();
        tokio::time::timeout(Duration::from_millis(200), grandchild.cancelled())
            .await
            .unwrap();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancellation_is_isolated() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn child_of_cancelled_parent_is_born_cancelled() {
        let parent = CancelToken::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }
}
