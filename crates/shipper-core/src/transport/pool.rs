// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide connection pool with an explicit lifecycle.
//!
//! The pool is created at startup, handed out one [`PooledConnection`] per send
//! attempt and closed at shutdown. A connection goes back to the pool when its guard
//! is dropped, which covers every exit path of an attempt.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug, thiserror::Error)]
#[error("connection pool is closed")]
pub struct PoolClosed;

#[derive(Debug)]
pub struct ConnectionPool {
    client: reqwest::Client,
    permits: Semaphore,
    size: usize,
    acquisitions: AtomicU64,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(client: reqwest::Client, max_connections: usize) -> Self {
        let size = max_connections.max(1);
        ConnectionPool {
            client,
            permits: Semaphore::new(size),
            size,
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Waits for a free connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolClosed`] once [`ConnectionPool::close`] has been called.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, PoolClosed> {
        let permit = self.permits.acquire().await.map_err(|_| PoolClosed)?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            client: &self.client,
            _permit: permit,
        })
    }

    /// Stops handing out connections. Guards already out stay valid until dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently handed out.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Connections handed out since the pool was created.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

/// A connection borrowed from a [`ConnectionPool`].
#[derive(Debug)]
pub struct PooledConnection<'a> {
    client: &'a reqwest::Client,
    _permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        self.client
    }
}
