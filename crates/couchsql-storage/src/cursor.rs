// CouchSQL - CouchDB document revision trees on SQL
// Copyright (C) 2025 CouchSQL Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Closable result cursors
//!
//! Streaming operations keep an SQL cursor, and with it a pooled connection,
//! open across calls. A [`Cursor`] releases both either when the rows run
//! out or when the caller calls [`Cursor::close`], and remembers which of the
//! two happened.

use crate::error::StorageResult;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

/// Rows fetched per round trip by cursors that page through a table.
///
/// Paged cursors hand their connection back between pages, so a reader left
/// open never starves a single-connection pool.
pub const PAGE_SIZE: i64 = 100;

/// Lifecycle of a [`Cursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// More items may follow
    Open,
    /// Every item was consumed, or the underlying query failed
    Exhausted,
    /// The caller stopped consuming early
    Closed,
}

/// A stream of results that can be cancelled explicitly
///
/// # Examples
///
/// ```
/// use couchsql_storage::{Cursor, CursorState};
///
/// # #[tokio::main]
/// # async fn main() -> couchsql_storage::StorageResult<()> {
/// let mut cursor = Cursor::from_stream(futures::stream::iter(vec![Ok(1), Ok(2)]));
/// assert_eq!(cursor.next().await.transpose()?, Some(1));
/// cursor.close();
/// cursor.close();
/// assert_eq!(cursor.state(), CursorState::Closed);
/// assert!(cursor.next().await.is_none());
/// # Ok(())
/// # }
/// ```
pub struct Cursor<T> {
    stream: Option<BoxStream<'static, StorageResult<T>>>,
    peeked: Option<T>,
    state: CursorState,
}

impl<T: Send + 'static> Cursor<T> {
    /// Wrap a stream of results
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StorageResult<T>> + Send + 'static,
    {
        Cursor {
            stream: Some(stream.boxed()),
            peeked: None,
            state: CursorState::Open,
        }
    }

    /// A cursor over already materialised items
    pub fn from_items(items: Vec<T>) -> Self {
        Self::from_stream(futures::stream::iter(items.into_iter().map(Ok)))
    }

    /// Fetch the next item, or `None` once exhausted or closed
    pub async fn next(&mut self) -> Option<StorageResult<T>> {
        if let Some(item) = self.peeked.take() {
            return Some(Ok(item));
        }
        let stream = self.stream.as_mut()?;
        match stream.next().await {
            Some(Ok(item)) => Some(Ok(item)),
            Some(Err(err)) => {
                self.finish(CursorState::Exhausted);
                Some(Err(err))
            }
            None => {
                self.finish(CursorState::Exhausted);
                None
            }
        }
    }

    /// Pull the first item ahead of time.
    ///
    /// Returns `false` when the cursor produced nothing. The item stays
    /// buffered and is returned by the following [`Cursor::next`].
    pub async fn prime(&mut self) -> StorageResult<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.next().await {
            Some(Ok(item)) => {
                self.peeked = Some(item);
                Ok(true)
            }
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }

    /// Stop consuming and release the underlying query. Idempotent.
    pub fn close(&mut self) {
        if self.state == CursorState::Open {
            self.finish(CursorState::Closed);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether [`Cursor::close`] ended this cursor
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Drain the remaining items into a vector
    pub async fn collect_all(mut self) -> StorageResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    fn finish(&mut self, state: CursorState) {
        self.stream = None;
        self.peeked = None;
        self.state = state;
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("peeked", &self.peeked.is_some())
            .finish()
    }
}
