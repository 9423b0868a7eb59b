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

//! Position source.
//!
//! Connects to a GPS feed (gpsd or a raw NMEA bridge) over TCP on its own
//! thread and posts every fix to the event bus. Failures end the thread after
//! posting a typed event; the control loop decides when to restart, using
//! [`RestartTimer`] for the delayed one-shot restart.

pub mod parser;

use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};
use rfmon_core::{Event, EventSender};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

pub use parser::{GpsProtocol, ParseError, Reading};

/// Delay before a failed position source is started again.
pub const GPS_RETRY: Duration = Duration::from_secs(5);

/// Window in which a fix must arrive.
pub const GPS_TIMEOUT: Duration = Duration::from_secs(15);

/// Sent to gpsd to switch on JSON reports.
const GPSD_WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Position source settings.
#[derive(Debug, Clone)]
pub struct GpsSettings {
    /// Feed address in "host:port" format.
    pub address: String,
    pub protocol: GpsProtocol,
    /// Post [`Event::GpsTimeout`] if no fix arrives within this window.
    pub timeout: Duration,
}

impl Default for GpsSettings {
    fn default() -> Self {
        Self {
            address: "localhost:2947".to_string(),
            protocol: GpsProtocol::Gpsd,
            timeout: GPS_TIMEOUT,
        }
    }
}

/// Handle to a running position source thread.
#[derive(Debug)]
pub struct PositionSource {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    address: String,
}

impl PositionSource {
    /// Start polling the feed on a new thread.
    pub fn start(settings: GpsSettings, bus: EventSender) -> std::io::Result<Self> {
        let cancel_token = CancellationToken::new();
        let thread_cancel = cancel_token.clone();
        let address = settings.address.clone();

        let handle = std::thread::Builder::new()
            .name("gps".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        post(&bus, Event::GpsError(format!("GPS runtime failed: {e}")));
                        return;
                    }
                };
                runtime.block_on(poll_loop(settings, bus, thread_cancel));
                info!("GPS thread exiting");
            })?;

        info!("GPS started for {address}");
        Ok(Self {
            cancel_token,
            handle: Some(handle),
            address,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and wait for the thread to exit.
    ///
    /// No events are posted once this returns. Calling it again does nothing.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel_token.cancel();
        if handle.join().is_err() {
            error!("GPS thread panicked");
        } else {
            info!("GPS stopped");
        }
    }
}

impl Drop for PositionSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn post(bus: &EventSender, event: Event) {
    if let Err(e) = bus.post(event) {
        debug!("GPS event not delivered: {e}");
    }
}

async fn poll_loop(settings: GpsSettings, bus: EventSender, cancel_token: CancellationToken) {
    tokio::select! {
        result = connect_and_read(&settings, &bus) => {
            if let Err(e) = result {
                error!("GPS error: {e}");
                post(&bus, Event::GpsError(e.to_string()));
            }
        }
        () = cancel_token.cancelled() => {
            info!("GPS connection cancelled");
        }
    }
}

/// Read reports until the feed fails or goes quiet.
///
/// Returns `Ok` once a terminal event other than an error has been posted.
async fn connect_and_read(settings: &GpsSettings, bus: &EventSender) -> std::io::Result<()> {
    info!("Connecting to GPS at {}...", settings.address);
    let mut stream = TcpStream::connect(&settings.address).await?;
    info!("Connected to GPS at {}", settings.address);

    if settings.protocol == GpsProtocol::Gpsd {
        stream.write_all(GPSD_WATCH).await?;
    }

    let mut lines = BufReader::new(stream).lines();
    let mut deadline = Instant::now() + settings.timeout;
    let mut fixes = 0u64;

    loop {
        let Ok(line) = timeout_at(deadline, lines.next_line()).await else {
            warn!("No GPS fix within {:?}", settings.timeout);
            post(bus, Event::GpsTimeout("GPS timed out".to_string()));
            return Ok(());
        };
        let Some(line) = line? else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "GPS connection closed",
            ));
        };

        match settings.protocol.parse(&line) {
            Ok(Reading::Fix(position)) => {
                fixes += 1;
                deadline = Instant::now() + settings.timeout;
                if fixes % 60 == 1 {
                    debug!("GPS fix #{fixes}: {position}");
                }
                post(bus, Event::GpsLoc(position));
            }
            Ok(Reading::Poor(message)) => post(bus, Event::GpsWarn(message)),
            Ok(Reading::Ignored) => {}
            Err(e) => debug!("Unparsed GPS line: {e}"),
        }
    }
}

/// One-shot delayed restart of the position source.
///
/// Scheduling replaces any pending restart, so at most one is ever due.
#[derive(Debug, Default)]
pub struct RestartTimer {
    pending: Option<CancellationToken>,
}

impl RestartTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post [`Event::GpsRestart`] after `delay`. Must be called within a tokio runtime.
    pub fn schedule(&mut self, delay: Duration, bus: EventSender) {
        self.cancel();
        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = sleep(delay) => post(&bus, Event::GpsRestart),
                () = task_token.cancelled() => {}
            }
        });
        debug!("GPS restart scheduled in {delay:?}");
        self.pending = Some(token);
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }

    /// Mark the pending restart as delivered.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for RestartTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
