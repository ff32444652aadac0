//! The consumer runtime: subscription, reconnection, acknowledgement
//! tracking, and state-file persistence.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};

use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::ife::InFlightEvents;
use crate::operation::Operation;

type EventStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Cadence of the state-file saver.
const SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Filters applied to the subscription.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Object types to filter on.
    pub types: Vec<String>,
    /// Parent `type/id` references to filter on.
    pub parents: Vec<String>,
}

/// Subscription options.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Path of the state file persisting the current oplog position. When
    /// unset, the position is not persisted and the subscription is
    /// live-only.
    pub state_file: Option<PathBuf>,
    /// Password for a password-protected oplog.
    pub password: Option<String>,
    /// Filters to apply on the oplog output.
    pub filter: Filter,
    /// Removes any saved state and forces a full replication.
    pub reset: bool,
}

struct Backoff {
    delay: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_INITIAL,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_INITIAL;
    }
}

/// The current oplog position plus its persistence state, guarded by one
/// reader-writer lock. The dirty flag drives the periodic saver.
#[derive(Debug, Default)]
struct Position {
    inner: RwLock<PositionState>,
}

#[derive(Debug, Default)]
struct PositionState {
    last_id: String,
    dirty: bool,
}

impl Position {
    fn new(last_id: String) -> Self {
        Self {
            inner: RwLock::new(PositionState {
                last_id,
                dirty: false,
            }),
        }
    }

    fn last_id(&self) -> String {
        self.inner
            .read()
            .expect("position lock poisoned")
            .last_id
            .clone()
    }

    /// Advances the position after an acknowledged head event; picked up by
    /// the saver.
    fn advance(&self, id: &str) {
        let mut state = self.inner.write().expect("position lock poisoned");
        state.last_id = id.to_string();
        state.dirty = true;
    }

    /// Overrides the position without scheduling a save. Used when the
    /// server refuses a resume and by the caller's recovery policy.
    fn set_volatile(&self, id: &str) {
        let mut state = self.inner.write().expect("position lock poisoned");
        state.last_id = id.to_string();
    }

    fn take_dirty(&self) -> Option<String> {
        let mut state = self.inner.write().expect("position lock poisoned");
        if state.dirty {
            state.dirty = false;
            Some(state.last_id.clone())
        } else {
            None
        }
    }

    fn mark_dirty(&self) {
        self.inner.write().expect("position lock poisoned").dirty = true;
    }
}

/// Pauses emission between a `reset` event and its acknowledgement.
///
/// Pushing a reset takes the single permit and holds it; every later push
/// waits for the permit until the application acknowledges the reset.
struct ResetGate {
    sem: Semaphore,
    pending: Mutex<Option<String>>,
}

impl ResetGate {
    fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            pending: Mutex::new(None),
        }
    }

    async fn close(&self, id: String) {
        let permit = self
            .sem
            .acquire()
            .await
            .expect("gate semaphore is never closed");
        permit.forget();
        *self.pending.lock().expect("gate lock poisoned") = Some(id);
    }

    async fn wait_open(&self) {
        drop(
            self.sem
                .acquire()
                .await
                .expect("gate semaphore is never closed"),
        );
    }

    fn on_ack(&self, id: &str) {
        let mut pending = self.pending.lock().expect("gate lock poisoned");
        if pending.as_deref() == Some(id) {
            *pending = None;
            self.sem.add_permits(1);
        }
    }
}

/// A subscription to an oplog server.
///
/// Create with [`Consumer::subscribe`], then drive with
/// [`Consumer::process`]. Operations are delivered on a channel and must be
/// acknowledged with [`Operation::done`] once handled; the persisted resume
/// position only moves past acknowledged events.
pub struct Consumer {
    url: String,
    options: Options,
    client: reqwest::Client,
    position: Position,
    ife: InFlightEvents,
    initial: Mutex<Option<EventStream>>,
}

impl Consumer {
    /// Creates a consumer connected to the given oplog URL.
    ///
    /// If the oplog is password protected and the credentials are invalid,
    /// [`Error::AccessDenied`] is returned. Other connection errors do not
    /// fail the subscription; [`Consumer::process`] reconnects until the
    /// server is reachable.
    pub async fn subscribe(url: &str, options: Options) -> Result<Consumer> {
        if options.reset {
            if let Some(path) = &options.state_file {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::State(e.to_string())),
                }
            }
        }

        let last_id = load_last_id(options.state_file.as_deref())?;
        let consumer = Consumer {
            url: build_url(url, &options.filter),
            client: reqwest::Client::new(),
            position: Position::new(last_id),
            ife: InFlightEvents::new(),
            initial: Mutex::new(None),
            options,
        };

        // Probe the connection once so bad credentials fail fast; anything
        // else is left to the reconnect loop.
        match consumer.connect().await {
            Ok(stream) => {
                *consumer
                    .initial
                    .lock()
                    .expect("initial stream lock poisoned") = Some(stream);
            }
            Err(Error::AccessDenied) => return Err(Error::AccessDenied),
            Err(e) => {
                tracing::debug!(error = %e, "initial connection failed, will retry");
            }
        }

        Ok(consumer)
    }

    /// The current in-memory position.
    pub fn last_id(&self) -> String {
        self.position.last_id()
    }

    /// Overrides the position used for the next reconnection.
    ///
    /// This is the recovery hook for [`Error::ResumeFailed`]: setting `"0"`
    /// forces a full replication on the next connection.
    pub fn set_last_id(&self, id: &str) {
        self.position.set_volatile(id);
    }

    /// Number of delivered but unacknowledged events.
    pub fn in_flight(&self) -> usize {
        self.ife.count()
    }

    /// Reads the oplog stream and delivers operations on `ops_tx` until the
    /// stop channel fires.
    ///
    /// Errors are reported on `errs_tx` without terminating, except
    /// [`Error::AccessDenied`], which stops the stream task. `done_tx` is
    /// signalled once everything has wound down. Any change or closure of
    /// `stop_rx` stops processing.
    pub async fn process(
        self: Arc<Self>,
        ops_tx: mpsc::Sender<Operation>,
        errs_tx: mpsc::Sender<Error>,
        stop_rx: watch::Receiver<bool>,
        done_tx: oneshot::Sender<()>,
    ) {
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<String>();
        let gate = Arc::new(ResetGate::new());

        let decode = tokio::spawn(self.clone().decode_loop(
            ops_tx,
            errs_tx.clone(),
            stop_rx.clone(),
            ack_tx,
            gate.clone(),
        ));
        let saver = tokio::spawn(self.clone().save_loop(errs_tx, stop_rx.clone()));

        // Ack loop: the persisted position only advances when the head of
        // the in-flight set is acknowledged.
        let mut stop_rx = stop_rx;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                id = ack_rx.recv() => match id {
                    Some(id) => {
                        let (found, first) = self.ife.pull(&id);
                        if found {
                            gate.on_ack(&id);
                            if first {
                                self.position.advance(&id);
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        let _ = decode.await;
        let _ = saver.await;
        let _ = done_tx.send(());
        tracing::info!("consumer stopped");
    }

    async fn decode_loop(
        self: Arc<Self>,
        ops_tx: mpsc::Sender<Operation>,
        errs_tx: mpsc::Sender<Error>,
        mut stop_rx: watch::Receiver<bool>,
        ack_tx: mpsc::UnboundedSender<String>,
        gate: Arc<ResetGate>,
    ) {
        // A full replication starts with a local reset so the application
        // clears its state before the stream arrives.
        if self.position.last_id() == "0" {
            let reset = Operation::new("0".to_string(), "reset".to_string(), None, ack_tx.clone());
            if !self.emit(reset, &gate, &ops_tx, &mut stop_rx).await {
                return;
            }
        }

        let initial = self
            .initial
            .lock()
            .expect("initial stream lock poisoned")
            .take();
        let mut decoder = initial.map(Decoder::new);
        let mut backoff = Backoff::new();

        loop {
            if decoder.is_none() {
                match self.reconnect(&mut backoff, &errs_tx, &mut stop_rx).await {
                    Some(stream) => decoder = Some(Decoder::new(stream)),
                    None => return,
                }
            }
            let current = decoder.as_mut().expect("connection was just established");

            let next = tokio::select! {
                next = current.next() => next,
                _ = stop_rx.changed() => return,
            };
            match next {
                Ok(raw) => {
                    backoff.reset();
                    let op = Operation::new(raw.id, raw.event, raw.data, ack_tx.clone());
                    if !self.emit(op, &gate, &ops_tx, &mut stop_rx).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stream error, reconnecting");
                    decoder = None;
                    if errs_tx.send(e).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Delivers one operation, honoring the reset gate. Returns false when
    /// processing should stop.
    async fn emit(
        &self,
        op: Operation,
        gate: &ResetGate,
        ops_tx: &mpsc::Sender<Operation>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        if op.event == "reset" {
            tokio::select! {
                _ = gate.close(op.id.clone()) => {}
                _ = stop_rx.changed() => return false,
            }
        } else {
            tokio::select! {
                _ = gate.wait_open() => {}
                _ = stop_rx.changed() => return false,
            }
        }
        self.ife.push(&op.id);
        tokio::select! {
            sent = ops_tx.send(op) => sent.is_ok(),
            _ = stop_rx.changed() => false,
        }
    }

    /// Reconnects with exponential backoff. Returns `None` when stopped or
    /// on fatal errors.
    async fn reconnect(
        &self,
        backoff: &mut Backoff,
        errs_tx: &mpsc::Sender<Error>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Option<EventStream> {
        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => return None,
            }
            let attempt = tokio::select! {
                attempt = self.connect() => attempt,
                _ = stop_rx.changed() => return None,
            };
            match attempt {
                Ok(stream) => return Some(stream),
                Err(Error::AccessDenied) => {
                    let _ = errs_tx.send(Error::AccessDenied).await;
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connection failed, retrying");
                    if errs_tx.send(e).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Opens the SSE stream, verifying the resume echo.
    async fn connect(&self) -> Result<EventStream> {
        let last_id = self.position.last_id();

        let mut request = self
            .client
            .get(&self.url)
            .header("Cache-Control", "no-cache")
            .header("Accept", "text/event-stream");
        if !last_id.is_empty() {
            request = request.header("Last-Event-ID", &last_id);
        }
        if let Some(password) = &self.options.password {
            request = request.basic_auth("", Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => return Err(Error::AccessDenied),
            code => {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::Connection(format!("HTTP error {}: {}", code, message)));
            }
        }

        if !last_id.is_empty() {
            let echoed = response
                .headers()
                .get("Last-Event-ID")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if echoed != last_id {
                // The server did not honor the resume position. Drop it so
                // the next reconnection starts live; the caller may instead
                // force a full replication via set_last_id("0").
                self.position.set_volatile("");
                return Err(Error::ResumeFailed);
            }
        }

        Ok(Box::pin(response.bytes_stream()))
    }

    async fn save_loop(
        self: Arc<Self>,
        errs_tx: mpsc::Sender<Error>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let Some(path) = self.options.state_file.clone() else {
            return;
        };
        let mut interval = tokio::time::interval(SAVE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop_rx.changed() => {
                    // Final best-effort save on the way out.
                    if let Some(position) = self.position.take_dirty() {
                        let _ = write_atomic(&path, &position);
                    }
                    return;
                }
            }
            if let Some(position) = self.position.take_dirty() {
                if let Err(e) = write_atomic(&path, &position) {
                    self.position.mark_dirty();
                    if errs_tx.send(Error::WritingState(e.to_string())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn build_url(url: &str, filter: &Filter) -> String {
    let mut query = String::new();
    if !filter.parents.is_empty() {
        query.push_str("parents=");
        query.push_str(&filter.parents.join(","));
    }
    if !filter.types.is_empty() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str("types=");
        query.push_str(&filter.types.join(","));
    }
    if query.is_empty() {
        url.to_string()
    } else {
        format!("{}?{}", url, query)
    }
}

/// Loads the persisted position.
///
/// No state file means a live-only subscription; an absent file means a
/// full replication from scratch. A file that exists but does not hold a
/// valid position is a fatal error.
fn load_last_id(state_file: Option<&Path>) -> Result<String> {
    let Some(path) = state_file else {
        return Ok(String::new());
    };
    match std::fs::read_to_string(path) {
        Ok(content) => {
            validate_position(&content)?;
            Ok(content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("0".to_string()),
        Err(e) => Err(Error::State(e.to_string())),
    }
}

/// A valid position is empty, up to 13 decimal digits, or 24 lowercase hex
/// characters.
fn validate_position(content: &str) -> Result<()> {
    let replication = content.len() <= 13 && content.bytes().all(|b| b.is_ascii_digit());
    let operation = content.len() == 24
        && content
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if replication || operation {
        Ok(())
    } else {
        Err(Error::State(format!("invalid position {:?}", content)))
    }
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}
