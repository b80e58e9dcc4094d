//! Cancellable realtime streams.
//!
//! A [`Subscription`] is the owner-side end of a realtime listener. It yields
//! snapshots as a [`Stream`] and must be torn down with
//! [`Subscription::cancel`] by whoever displays it. Dropping a subscription
//! closes its channel, and producers prune closed listeners on their next
//! delivery, but that is a fallback and not the contract.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};

type Canceller = Box<dyn FnOnce() + Send>;

pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    canceller: Option<Canceller>,
}

impl<T> Subscription<T> {
    /// Creates a subscription and the sender its producer pushes snapshots into.
    /// `on_cancel` runs exactly once, when the owner calls [`Subscription::cancel`].
    pub fn channel<F>(on_cancel: F) -> (mpsc::UnboundedSender<T>, Self)
    where
        F: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            receiver,
            canceller: Some(Box::new(on_cancel)),
        };
        (sender, subscription)
    }

    /// Waits for the next snapshot. `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns an already delivered snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Detaches the listener from its producer.
    pub fn cancel(mut self) {
        self.receiver.close();
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }

    /// Derives a subscription by running `handler` on every snapshot of this one.
    ///
    /// The handler receives a sender and may emit zero or more derived values,
    /// including later ones from tasks it spawns. Cancelling (or dropping) the
    /// derived subscription cancels this one.
    pub fn pipe<U, F, Fut>(self, mut handler: F) -> Subscription<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T, mpsc::UnboundedSender<U>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (sender, derived) = Subscription::channel(move || {
            let _ = stop_tx.send(());
        });

        let mut inner = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    item = inner.recv() => match item {
                        Some(item) if !sender.is_closed() => handler(item, sender.clone()).await,
                        _ => break,
                    },
                }
            }
            inner.cancel();
        });

        derived
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.canceller.is_none())
            .finish()
    }
}
