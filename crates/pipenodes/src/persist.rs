use pipecore::{PersistHook, Pipeline};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

enum WriterMessage {
    Snapshot { path: PathBuf, json: Vec<u8> },
    Flush(oneshot::Sender<()>),
}

/// Persist hook that writes each snapshot's status report to
/// `<dir>/<pipeline_id>.json`, replacing the previous one.
///
/// The hook only serializes the report and queues it. Files are written by
/// a dedicated writer thread, so no filesystem call happens while the
/// pipeline lock is held. When several snapshots of one pipeline are queued
/// only the newest is written. Write failures are logged and never
/// interrupt the run.
#[derive(Debug, Clone)]
pub struct JsonSnapshotPersister {
    dir: PathBuf,
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl JsonSnapshotPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let writer_dir = dir.clone();
        let spawned = std::thread::Builder::new()
            .name("snapshot-writer".to_string())
            .spawn(move || run_writer(writer_dir, rx));
        if let Err(e) = spawned {
            // The receiver is gone with the closure; persist() will log each drop.
            tracing::error!(dir = %dir.display(), "failed to start snapshot writer: {}", e);
        }

        Self { dir, tx }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, pipeline_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", pipeline_id))
    }

    /// Waits until every snapshot queued before this call is on disk (or
    /// has failed and been logged).
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl PersistHook for JsonSnapshotPersister {
    fn persist(&self, pipeline: &Pipeline) {
        let json = match serde_json::to_vec_pretty(&pipeline.export_status()) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(pipeline = %pipeline.id(), "failed to encode pipeline snapshot: {}", e);
                return;
            }
        };
        let message = WriterMessage::Snapshot {
            path: self.path_for(pipeline.id()),
            json,
        };
        if self.tx.send(message).is_err() {
            tracing::warn!(
                pipeline = %pipeline.id(),
                dir = %self.dir.display(),
                "snapshot writer is not running, snapshot dropped"
            );
        }
    }
}

fn run_writer(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
    while let Some(first) = rx.blocking_recv() {
        let mut pending: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
        let mut acks = Vec::new();

        let mut next = Some(first);
        while let Some(message) = next {
            match message {
                WriterMessage::Snapshot { path, json } => {
                    pending.insert(path, json);
                }
                WriterMessage::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }

        for (path, json) in pending {
            if let Err(e) = write_snapshot(&dir, &path, &json) {
                tracing::warn!(
                    path = %path.display(),
                    "failed to write pipeline snapshot: {}",
                    e
                );
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
    tracing::debug!(dir = %dir.display(), "snapshot writer stopped");
}

fn write_snapshot(dir: &Path, path: &Path, json: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    // Write then rename so readers never see a half-written file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
