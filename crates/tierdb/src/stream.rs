//! Stream utilities for live snapshots.
//!
//! Provides utilities for converting broadcast and watch channels into
//! async streams for ergonomic change handling.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::{broadcast, watch};

use tierdb_core::{DocSnapshot, QuerySnapshot};

/// Boxed, sendable stream.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Live stream of document snapshots.
pub type DocSnapshotStream = BoxStream<DocSnapshot>;

/// Live stream of query snapshots.
pub type QuerySnapshotStream = BoxStream<QuerySnapshot>;

/// Convert a broadcast receiver into an async Stream.
///
/// This handles the `Lagged` error by continuing to receive
/// subsequent messages (older messages are lost).
pub fn broadcast_to_stream<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(item) => yield item,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Convert a watch receiver into an async Stream.
///
/// The current value is yielded first (if set), then every later value.
/// `None` marks a channel that has not published yet and is skipped.
pub fn watch_to_stream<T: Clone + Send + Sync + 'static>(
    mut rx: watch::Receiver<Option<T>>,
) -> BoxStream<T> {
    Box::pin(async_stream::stream! {
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(item) = current {
                yield item;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
