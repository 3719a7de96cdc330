use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use super::{ItemStatus, QueueItem};

/// Rewrite the log once it holds this many records more than live items.
const COMPACT_SLACK: usize = 1024;

/// Append-only JSONL record of queue state changes. Replaying the log from
/// the top rebuilds the live queue after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum QueueRecord {
    Enqueued { item: QueueItem },
    Failed {
        id: Uuid,
        attempts: u32,
        next_eligible_at: DateTime<Utc>,
    },
    Delivered { id: Uuid },
    Dead { id: Uuid },
    Purged { id: Uuid },
}

struct ActiveLog {
    writer: BufWriter<File>,
    records: usize,
}

/// Durable backing store for the sync queue.
///
/// Items are persisted before they are reported enqueued, so an unexpected
/// shutdown cannot lose a pending result. There is no in-flight record on
/// disk: a crash mid-push replays the item as pending, which is exactly the
/// at-least-once semantics the reconciler needs.
pub struct QueueStore {
    path: PathBuf,
    log: Mutex<ActiveLog>,
}

impl QueueStore {
    /// Open the store, replaying any existing log. Returns the store plus
    /// the live items (pending and dead) it recovered.
    pub fn open(path: &Path) -> Result<(Self, Vec<QueueItem>)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (items, records) = if path.exists() {
            Self::replay(path)?
        } else {
            (Vec::new(), 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let store = Self {
            path: path.to_path_buf(),
            log: Mutex::new(ActiveLog {
                writer: BufWriter::new(file),
                records,
            }),
        };

        if !items.is_empty() {
            tracing::info!(
                "[queue] recovered {} items from {}",
                items.len(),
                path.display()
            );
        }

        Ok((store, items))
    }

    fn replay(path: &Path) -> Result<(Vec<QueueItem>, usize)> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut live: HashMap<Uuid, QueueItem> = HashMap::new();
        let mut records = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records += 1;
            let record = match serde_json::from_str::<QueueRecord>(&line) {
                Ok(r) => r,
                Err(e) => {
                    // A torn trailing write is expected after a hard crash;
                    // anything else is worth a warning but never fatal.
                    tracing::warn!("[queue] skipping unreadable record: {}", e);
                    continue;
                }
            };
            match record {
                QueueRecord::Enqueued { mut item } => {
                    // In-flight at crash time means the push never completed.
                    item.status = ItemStatus::Pending;
                    live.insert(item.id, item);
                }
                QueueRecord::Failed {
                    id,
                    attempts,
                    next_eligible_at,
                } => {
                    if let Some(item) = live.get_mut(&id) {
                        item.attempts = attempts;
                        item.next_eligible_at = next_eligible_at;
                        item.status = ItemStatus::Pending;
                    }
                }
                QueueRecord::Delivered { id } | QueueRecord::Purged { id } => {
                    live.remove(&id);
                }
                QueueRecord::Dead { id } => {
                    if let Some(item) = live.get_mut(&id) {
                        item.status = ItemStatus::Dead;
                    }
                }
            }
        }

        let mut items: Vec<QueueItem> = live.into_values().collect();
        items.sort_by_key(|i| i.created_at);
        Ok((items, records))
    }

    pub fn append(&self, record: &QueueRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut log = self.log.lock().unwrap();
        log.writer.write_all(line.as_bytes())?;
        log.writer.write_all(b"\n")?;
        log.writer.flush()?;
        log.records += 1;
        Ok(())
    }

    /// Whether the log has accumulated enough dead weight to be worth
    /// rewriting.
    pub fn should_compact(&self, live_items: usize) -> bool {
        let records = self.log.lock().unwrap().records;
        records > live_items + COMPACT_SLACK
    }

    /// Rewrite the log to contain exactly the given live items.
    pub fn compact(&self, items: &[QueueItem]) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for item in items {
                let record = QueueRecord::Enqueued { item: item.clone() };
                let line = serde_json::to_string(&record)?;
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                if item.status == ItemStatus::Dead {
                    let line = serde_json::to_string(&QueueRecord::Dead { id: item.id })?;
                    writer.write_all(line.as_bytes())?;
                    writer.write_all(b"\n")?;
                }
            }
            writer.flush()?;
        }

        let mut log = self.log.lock().unwrap();
        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        log.writer = BufWriter::new(file);
        log.records = items.len();
        tracing::debug!("[queue] compacted log to {} items", items.len());
        Ok(())
    }
}
