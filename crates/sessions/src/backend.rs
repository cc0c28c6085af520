//! Storage backends for session histories.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    fd_lock::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    message::Turn,
};

/// Sweep idle sessions once every this many writes.
const IDLE_SWEEP_EVERY: u64 = 64;

/// Keyed storage for session histories.
///
/// Callers serialize access per session; implementations only need to be
/// safe across different keys.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Full history, oldest first. Absent sessions load as empty.
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Replace the whole history.
    async fn store(&self, session_id: &str, turns: &[Turn]) -> Result<()>;

    /// Append one turn to the end of the history.
    async fn append(&self, session_id: &str, turn: &Turn) -> Result<()> {
        let mut turns = self.load(session_id).await?;
        turns.push(turn.clone());
        self.store(session_id, &turns).await
    }

    /// Delete the session. Removing an absent session is a no-op.
    async fn remove(&self, session_id: &str) -> Result<()>;
}

// ── In-memory ───────────────────────────────────────────────────────────────

struct SessionEntry {
    turns: Vec<Turn>,
    last_touched: Instant,
}

/// Volatile backend bounded by session count and, optionally, idle time.
///
/// When a new session would exceed `max_sessions`, the least recently
/// touched session is evicted.
pub struct MemoryBackend {
    sessions: DashMap<String, SessionEntry>,
    max_sessions: usize,
    idle_ttl: Option<Duration>,
    writes: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(max_sessions: usize, idle_ttl: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: max_sessions.max(1),
            idle_ttl,
            writes: AtomicU64::new(0),
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_idle(&self, entry: &SessionEntry, now: Instant) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.last_touched) > ttl)
    }

    fn load_at(&self, session_id: &str, now: Instant) -> Vec<Turn> {
        let expired = match self.sessions.get_mut(session_id) {
            Some(mut entry) if !self.is_idle(&entry, now) => {
                entry.last_touched = now;
                return entry.turns.clone();
            },
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!(session_id, "dropping idle session");
            self.sessions.remove(session_id);
        }
        Vec::new()
    }

    fn store_at(&self, session_id: &str, turns: &[Turn], now: Instant) {
        let is_new = !self.sessions.contains_key(session_id);
        if is_new && self.sessions.len() >= self.max_sessions {
            self.evict_lru();
        }
        self.sessions.insert(session_id.to_string(), SessionEntry {
            turns: turns.to_vec(),
            last_touched: now,
        });
        self.sweep_if_needed(now);
    }

    fn evict_lru(&self) {
        // Pick the key first; removing while iterating would deadlock the shard.
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().last_touched)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            debug!(session_id = %key, "evicting least recently used session");
            self.sessions.remove(&key);
        }
    }

    fn sweep_if_needed(&self, now: Instant) {
        let Some(ttl) = self.idle_ttl else {
            return;
        };
        let seen = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(IDLE_SWEEP_EVERY) {
            return;
        }
        self.sessions
            .retain(|_, entry| now.saturating_duration_since(entry.last_touched) <= ttl);
    }
}

#[async_trait]
impl HistoryBackend for MemoryBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>> {
        Ok(self.load_at(session_id, Instant::now()))
    }

    async fn store(&self, session_id: &str, turns: &[Turn]) -> Result<()> {
        self.store_at(session_id, turns, Instant::now());
        Ok(())
    }

    async fn append(&self, session_id: &str, turn: &Turn) -> Result<()> {
        let now = Instant::now();
        let mut turns = self.load_at(session_id, now);
        turns.push(turn.clone());
        self.store_at(session_id, &turns, now);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        Ok(())
    }
}

// ── JSONL files ─────────────────────────────────────────────────────────────

/// One `<session>.jsonl` file per session, one turn per line, guarded by
/// an advisory file lock.
pub struct JsonlBackend {
    base_dir: PathBuf,
}

impl JsonlBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Map a session id onto a safe file name. Bytes outside
    /// `[A-Za-z0-9_-]` are percent-encoded, so distinct ids never share a
    /// file and no id can escape the base directory.
    #[must_use]
    pub fn key_to_filename(key: &str) -> String {
        let mut name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", Self::key_to_filename(key)))
    }
}

fn read_turns(path: PathBuf) -> Result<Vec<Turn>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(&path)?;
    let lock = RwLock::new(file);
    let guard = lock.read().map_err(|e| Error::lock_failed(e.to_string()))?;
    let mut turns = Vec::new();
    for line in BufReader::new(&*guard).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(trimmed) {
            Ok(turn) => turns.push(turn),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed JSONL line"),
        }
    }
    Ok(turns)
}

fn write_lines(path: PathBuf, lines: Vec<String>, append: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(&path)?;
    let mut lock = RwLock::new(file);
    let mut guard = lock
        .write()
        .map_err(|e| Error::lock_failed(e.to_string()))?;
    for line in &lines {
        writeln!(*guard, "{line}")?;
    }
    Ok(())
}

fn to_lines(turns: &[Turn]) -> Result<Vec<String>> {
    turns
        .iter()
        .map(|t| serde_json::to_string(t).map_err(Error::from))
        .collect()
}

#[async_trait]
impl HistoryBackend for JsonlBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Turn>> {
        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || read_turns(path)).await?
    }

    async fn store(&self, session_id: &str, turns: &[Turn]) -> Result<()> {
        let path = self.path_for(session_id);
        let lines = to_lines(turns)?;
        tokio::task::spawn_blocking(move || write_lines(path, lines, false)).await?
    }

    async fn append(&self, session_id: &str, turn: &Turn) -> Result<()> {
        let path = self.path_for(session_id);
        let lines = to_lines(std::slice::from_ref(turn))?;
        tokio::task::spawn_blocking(move || write_lines(path, lines, true)).await?
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        tokio::task::spawn_blocking(move || -> Result<()> {
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }
}
