//! Cancellation signal for blocking waits (poll loops, deadlines).

use tokio::sync::watch;

/// Triggers cancellation of all [CancelToken]s created from it.
///
/// Dropping the canceller without calling [Canceller::cancel] does not
/// cancel anything.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Cheap, clonable handle that blocking operations wait on.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Creates a connected canceller/token pair.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        // Stored even without live tokens, so tokens created later observe it.
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once cancelled. Pends forever if the canceller was dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (canceller, token) = cancel_pair();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        assert!(!token.is_cancelled());
        canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
        // Later waiters return immediately.
        token.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_token_does_not_fire() {
        let token = CancelToken::never();
        let res = tokio::time::timeout(Duration::from_secs(10), token.cancelled()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn subscribed_tokens_share_the_signal() {
        let (canceller, _) = cancel_pair();
        let token = canceller.token();
        canceller.cancel();
        token.cancelled().await;
    }
}
