// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Completed-signal export over TCP.
//!
//! Records are written as newline-delimited JSON to a single collector
//! connection. There is no reconnect: the first transport failure posts
//! [`Event::ServerError`] and the exporter stays dead for the session.

use std::time::Duration;

use log::{debug, error, info, warn};
use rfmon_core::{Event, EventSender, ExportRecord};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Configuration for the export connection.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Collector address in "host:port" format.
    pub address: String,
    /// Give up if the collector does not accept within this time.
    pub connect_timeout: Duration,
    /// Records buffered while the connection is slow.
    pub buffer_size: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            address: "localhost:30010".to_string(),
            connect_timeout: Duration::from_secs(5),
            buffer_size: 256,
        }
    }
}

/// Handle to the export task.
///
/// `send` never blocks. Once the task has died every `send` is a no-op.
pub struct Exporter {
    record_tx: Option<mpsc::Sender<ExportRecord>>,
    cancel_token: CancellationToken,
    address: String,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Spawn the export task on the current tokio runtime.
    #[must_use]
    pub fn spawn(config: ExporterConfig, bus: EventSender) -> Self {
        let (record_tx, record_rx) = mpsc::channel(config.buffer_size.max(1));
        let cancel_token = CancellationToken::new();

        let task_cancel = cancel_token.clone();
        let address = config.address.clone();
        tokio::spawn(async move {
            export_loop(config, record_rx, bus, task_cancel).await;
        });

        Self {
            record_tx: Some(record_tx),
            cancel_token,
            address,
        }
    }

    /// Hand a record to the export task.
    pub fn send(&mut self, record: ExportRecord) {
        let Some(tx) = &self.record_tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Export queue full, record dropped"),
            Err(TrySendError::Closed(_)) => {
                debug!("Export task has ended, disabling exporter");
                self.record_tx = None;
            }
        }
    }

    /// Drop the transport; later sends are ignored.
    pub fn disable(&mut self) {
        self.record_tx = None;
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.record_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn export_loop(
    config: ExporterConfig,
    mut record_rx: mpsc::Receiver<ExportRecord>,
    bus: EventSender,
    cancel_token: CancellationToken,
) {
    info!("Connecting to export server {}...", config.address);

    let connect = timeout(config.connect_timeout, TcpStream::connect(&config.address));
    let mut stream = tokio::select! {
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                fail(&bus, format!("Cannot connect to {}: {e}", config.address));
                return;
            }
            Err(_) => {
                fail(&bus, format!("Timed out connecting to {}", config.address));
                return;
            }
        },
        () = cancel_token.cancelled() => {
            info!("Export connection cancelled");
            return;
        }
    };
    info!("Connected to export server {}", config.address);

    let mut sent = 0u64;
    loop {
        tokio::select! {
            record = record_rx.recv() => {
                let Some(record) = record else {
                    info!("Exporter handle dropped after {sent} records");
                    return;
                };
                let line = match record.to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to encode export record: {e}");
                        continue;
                    }
                };
                if let Err(e) = stream.write_all(line.as_bytes()).await {
                    fail(&bus, format!("Export server write failed: {e}"));
                    return;
                }
                sent += 1;
                debug!("Exported record #{sent} at {:.4} MHz", record.frequency);
            }

            () = cancel_token.cancelled() => {
                info!("Export connection closed after {sent} records");
                let _ = stream.shutdown().await;
                return;
            }
        }
    }
}

fn fail(bus: &EventSender, message: String) {
    error!("{message}");
    if bus.post(Event::ServerError(message)).is_err() {
        warn!("Could not report export failure, event bus unavailable");
    }
}
