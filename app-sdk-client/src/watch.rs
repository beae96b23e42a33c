//! Translation of the raw Kubernetes watch stream into SDK events.
//!
//! A watch response has two mutually exclusive output modes: the default
//! SDK event channel fed by a background translator task, or the raw wire
//! stream for callers that want the untranslated frames. Decoding can be
//! sharded over worker tasks keyed by object identity, which preserves
//! per-object ordering while letting distinct objects decode concurrently.
use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use app_sdk_core::{
    codec::Codec,
    kind::Kind,
    watch::{WatchEvent, WatchEventType, WireWatchEvent},
    Status,
};
use futures::{stream::BoxStream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{error::Error, Result};

type LineStream = BoxStream<'static, Result<String>>;

/// A live watch over a kind's objects.
///
/// Obtain events with [`next`](Self::next) (or [`events`](Self::events) for
/// the channel itself), or take over the raw wire stream with
/// [`kubernetes_watch`](Self::kubernetes_watch). [`stop`](Self::stop) is
/// idempotent and closes the event channel exactly once, after the
/// translator has wound down.
pub struct WatchResponse {
    kind: Arc<Kind>,
    codec: Arc<dyn Codec>,
    decoder_workers: usize,
    buffer: usize,
    // Present until a consumption mode is chosen.
    raw: Option<LineStream>,
    halt: CancellationToken,
    events: Option<mpsc::Receiver<WatchEvent>>,
    handback: Option<oneshot::Receiver<LineStream>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for WatchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchResponse")
            .field("kind", &self.kind)
            .field("decoder_workers", &self.decoder_workers)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl WatchResponse {
    pub(crate) fn new(
        raw: LineStream,
        kind: Arc<Kind>,
        codec: Arc<dyn Codec>,
        decoder_workers: usize,
        buffer: usize,
    ) -> Self {
        Self {
            kind,
            codec,
            decoder_workers,
            buffer: buffer.max(1),
            raw: Some(raw),
            halt: CancellationToken::new(),
            events: None,
            handback: None,
            task: None,
        }
    }

    /// The SDK event channel, starting the translator on first use.
    ///
    /// Fails if the raw stream was already taken with
    /// [`kubernetes_watch`](Self::kubernetes_watch).
    pub fn events(&mut self) -> Result<&mut mpsc::Receiver<WatchEvent>> {
        if self.events.is_none() {
            let Some(stream) = self.raw.take() else {
                return Err(Error::Validation(
                    "watch stream was already consumed as a raw kubernetes watch".into(),
                ));
            };
            let (tx, rx) = mpsc::channel(self.buffer);
            let (handback_tx, handback_rx) = oneshot::channel();
            let translator = Translator {
                kind: Arc::clone(&self.kind),
                codec: Arc::clone(&self.codec),
                halt: self.halt.clone(),
            };
            self.task = Some(tokio::spawn(translator.run(
                stream,
                tx,
                handback_tx,
                self.decoder_workers,
                self.buffer,
            )));
            self.handback = Some(handback_rx);
            self.events = Some(rx);
        }
        Ok(self.events.as_mut().expect("events channel just initialized"))
    }

    /// The next SDK event, `None` once the watch has ended
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events().ok()?.recv().await
    }

    /// Take over the underlying Kubernetes watch stream.
    ///
    /// Halts the translator if it is running and hands back the remaining
    /// raw stream as parsed wire events. Must not be combined with
    /// concurrent [`events`](Self::events) consumption.
    pub async fn kubernetes_watch(&mut self) -> Result<BoxStream<'static, Result<WireWatchEvent>>> {
        let stream = if let Some(stream) = self.raw.take() {
            stream
        } else if let Some(handback) = self.handback.take() {
            self.halt.cancel();
            self.events = None;
            handback
                .await
                .map_err(|_| Error::Validation("watch stream already ended".into()))?
        } else {
            return Err(Error::Validation("watch stream already consumed".into()));
        };
        Ok(stream
            .map(|line| line.and_then(|line| parse_line(&line)))
            .boxed())
    }

    /// Stop the watch: cancel the translator, drop the underlying stream
    /// and close the event channel. Safe to call any number of times.
    pub async fn stop(&mut self) {
        self.halt.cancel();
        self.raw = None;
        self.handback = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchResponse {
    fn drop(&mut self) {
        self.halt.cancel();
    }
}

fn parse_line(line: &str) -> Result<WireWatchEvent> {
    Ok(serde_json::from_str::<WireWatchEvent>(line)?)
}

#[derive(PartialEq)]
enum Exit {
    Halted,
    Ended,
}

struct Translator {
    kind: Arc<Kind>,
    codec: Arc<dyn Codec>,
    halt: CancellationToken,
}

impl Translator {
    async fn run(
        self,
        stream: LineStream,
        tx: mpsc::Sender<WatchEvent>,
        handback: oneshot::Sender<LineStream>,
        workers: usize,
        buffer: usize,
    ) {
        if workers == 0 {
            self.run_inline(stream, tx, handback).await;
        } else {
            self.run_sharded(stream, tx, handback, workers, buffer).await;
        }
    }

    // Single-threaded decode: strict FIFO from wire to channel.
    async fn run_inline(
        self,
        mut stream: LineStream,
        tx: mpsc::Sender<WatchEvent>,
        handback: oneshot::Sender<LineStream>,
    ) {
        let exit = loop {
            tokio::select! {
                () = self.halt.cancelled() => break Exit::Halted,
                line = stream.next() => match line {
                    None => break Exit::Ended,
                    Some(Ok(line)) => {
                        let Some(event) = self.decode_line(&line) else { continue };
                        if tx.send(event).await.is_err() {
                            // Receiver gone; the caller may be switching to
                            // raw mode, so the stream must still come back.
                            break Exit::Halted;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "watch stream interrupted");
                        break Exit::Ended;
                    }
                },
            }
        };
        if exit == Exit::Halted {
            let _ = handback.send(stream);
        }
    }

    // Sharded decode: events are routed to workers by object identity, so
    // events for one object stay in arrival order while distinct objects
    // may decode concurrently.
    async fn run_sharded(
        self,
        mut stream: LineStream,
        tx: mpsc::Sender<WatchEvent>,
        handback: oneshot::Sender<LineStream>,
        workers: usize,
        buffer: usize,
    ) {
        let mut shards = Vec::with_capacity(workers);
        let mut worker_tasks = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (shard_tx, mut shard_rx) = mpsc::channel::<WireWatchEvent>(buffer);
            let out = tx.clone();
            let kind = Arc::clone(&self.kind);
            let codec = Arc::clone(&self.codec);
            worker_tasks.push(tokio::spawn(async move {
                while let Some(wire) = shard_rx.recv().await {
                    let Some(event) = decode_wire_event(&kind, codec.as_ref(), wire) else {
                        continue;
                    };
                    if out.send(event).await.is_err() {
                        return;
                    }
                }
            }));
            shards.push(shard_tx);
        }
        // The translator's own sender handle must go away so the channel
        // closes once every worker has drained.
        drop(tx);

        let exit = loop {
            tokio::select! {
                () = self.halt.cancelled() => break Exit::Halted,
                line = stream.next() => match line {
                    None => break Exit::Ended,
                    Some(Ok(line)) => {
                        let wire = match parse_line(&line) {
                            Ok(wire) => wire,
                            Err(err) => {
                                tracing::warn!(error = %err, "dropping undecodable watch frame");
                                continue;
                            }
                        };
                        let shard = shard_for(&wire, shards.len());
                        if shards[shard].send(wire).await.is_err() {
                            break Exit::Halted;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "watch stream interrupted");
                        break Exit::Ended;
                    }
                },
            }
        };
        if exit == Exit::Halted {
            let _ = handback.send(stream);
        }
        drop(shards);
        for task in worker_tasks {
            let _ = task.await;
        }
    }

    fn decode_line(&self, line: &str) -> Option<WatchEvent> {
        match parse_line(line) {
            Ok(wire) => decode_wire_event(&self.kind, self.codec.as_ref(), wire),
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable watch frame");
                None
            }
        }
    }
}

fn shard_for(wire: &WireWatchEvent, shards: usize) -> usize {
    let namespace = wire
        .object
        .pointer("/metadata/namespace")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let name = wire
        .object
        .pointer("/metadata/name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    (namespace, name).hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

fn decode_wire_event(kind: &Kind, codec: &dyn Codec, wire: WireWatchEvent) -> Option<WatchEvent> {
    match wire.event_type {
        WatchEventType::Bookmark => wire
            .bookmark_resource_version()
            .map(|resource_version| WatchEvent::Bookmark { resource_version }),
        WatchEventType::Error => {
            let status = serde_json::from_value::<Status>(wire.object).unwrap_or_else(|_| {
                Status::failure("watch error event carried no status", "Unknown")
            });
            Some(WatchEvent::Error(status))
        }
        object_event => {
            let mut obj = kind.zero_value();
            let data = match serde_json::to_vec(&wire.object) {
                Ok(data) => data,
                Err(err) => {
                    tracing::warn!(error = %err, "dropping unserializable watch payload");
                    return None;
                }
            };
            if let Err(err) = codec.read_into(&data, obj.as_mut()) {
                tracing::warn!(error = %err, "dropping watch event that failed to decode");
                return None;
            }
            Some(match object_event {
                WatchEventType::Added => WatchEvent::Added(obj),
                WatchEventType::Modified => WatchEvent::Modified(obj),
                _ => WatchEvent::Deleted(obj),
            })
        }
    }
}
