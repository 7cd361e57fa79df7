//! A string-labeled trie persisted as an append-only log of node-creation
//! records, supporting exact and wildcard path lookups.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StrataError, Subsystem};
use crate::record::{get_i64_le, get_u16_le, put_i64_le, put_u16_le};

/// The reserved record identifier of the implicit root node.
const ROOT: i64 = 0;
/// A parent + label-length header is 8 + 2 bytes; the trailing assigned id
/// is another 8 bytes.
const HEADER_LEN: usize = 10;

/// A node in the trie: the record identifier the epoch's block store uses
/// for it, and the full field path that reaches it from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub record_id: i64,
    pub fields: Vec<String>,
}

struct IndexState {
    next_id: i64,
    /// `parent_record_id -> (label -> child_record_id)`.
    children: HashMap<i64, HashMap<String, i64>>,
    /// `record_id -> full path from the root`.
    paths: HashMap<i64, Vec<String>>,
    /// The full append-only log, rewritten in full on every `sync`.
    log: Vec<u8>,
}

/// A trie keyed by ordered string field paths, where every node's
/// `record_id` is assigned once, at creation, and never reused.
pub struct Index {
    path: PathBuf,
    read_only: bool,
    file: Mutex<Option<File>>,
    state: RwLock<IndexState>,
    closed: AtomicBool,
}

impl Index {
    pub fn open(path: impl Into<PathBuf>, read_only: bool) -> Result<Self> {
        let path = path.into();
        let exists = path.exists();
        if read_only && !exists {
            return Err(StrataError::NotFound { subsystem: Subsystem::Index, path });
        }

        let mut opts = OpenOptions::new();
        opts.read(true);
        if !read_only {
            opts.write(true).create(true);
        }
        let file = opts.open(&path).map_err(|source| io_err(&path, source))?;

        let bytes = if exists {
            let len = file.metadata().map_err(|source| io_err(&path, source))?.len() as usize;
            let mut buf = vec![0u8; len];
            file.read_exact_at(&mut buf, 0).map_err(|source| io_err(&path, source))?;
            buf
        } else {
            Vec::new()
        };

        let (children, paths, next_id, valid_len) = replay(&bytes);
        let log = bytes[..valid_len].to_vec();

        Ok(Self {
            path,
            read_only,
            file: Mutex::new(Some(file)),
            state: RwLock::new(IndexState { next_id, children, paths, log }),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates any missing node along `path` and returns the deepest node.
    /// A duplicate `ensure` of an existing path is a no-op that returns the
    /// existing node. An empty path returns the implicit root.
    pub fn ensure(&self, fields: &[String]) -> Result<IndexNode> {
        self.check_open()?;
        if fields.is_empty() {
            return Ok(IndexNode { record_id: ROOT, fields: Vec::new() });
        }

        let mut state = self.state.write();
        let mut current = ROOT;
        for label in fields {
            let existing = state.children.get(&current).and_then(|m| m.get(label)).copied();
            current = match existing {
                Some(id) => id,
                None => {
                    if self.read_only {
                        return Err(StrataError::ReadOnly { subsystem: Subsystem::Index });
                    }
                    let assigned = state.next_id;
                    state.next_id += 1;

                    let mut path = state.paths.get(&current).cloned().unwrap_or_default();
                    path.push(label.clone());

                    append_record(&mut state.log, current, label, assigned);
                    state.children.entry(current).or_default().insert(label.clone(), assigned);
                    state.paths.insert(assigned, path);
                    assigned
                }
            };
        }
        Ok(IndexNode { record_id: current, fields: fields.to_vec() })
    }

    /// Returns every node whose stored path matches `fields`: equal in
    /// length, with each query element either equal to the stored element
    /// or the wildcard `"*"`. Dispatches to an O(depth) walk when no
    /// element is a wildcard, and a branching descent otherwise.
    pub fn find(&self, fields: &[String]) -> Result<Vec<IndexNode>> {
        self.check_open()?;
        if fields.is_empty() {
            return Ok(vec![IndexNode { record_id: ROOT, fields: Vec::new() }]);
        }

        let state = self.state.read();
        if fields.iter().all(|f| f != "*") {
            let mut current = ROOT;
            for label in fields {
                match state.children.get(&current).and_then(|m| m.get(label)) {
                    Some(&id) => current = id,
                    None => return Ok(Vec::new()),
                }
            }
            let path = state.paths.get(&current).cloned().unwrap_or_default();
            return Ok(vec![IndexNode { record_id: current, fields: path }]);
        }

        let mut candidates = vec![ROOT];
        for label in fields {
            let mut next = Vec::new();
            for candidate in &candidates {
                let Some(children) = state.children.get(candidate) else { continue };
                if label == "*" {
                    next.extend(children.values().copied());
                } else if let Some(&id) = children.get(label) {
                    next.push(id);
                }
            }
            candidates = next;
            if candidates.is_empty() {
                break;
            }
        }
        Ok(candidates
            .into_iter()
            .map(|id| IndexNode { record_id: id, fields: state.paths.get(&id).cloned().unwrap_or_default() })
            .collect())
    }

    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        self.flush()
    }

    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = if self.read_only { Ok(()) } else { self.flush() };
        *self.file.lock() = None;
        result
    }

    fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let state = self.state.read();
        let mut file_guard = self.file.lock();
        let file = file_guard.as_mut().ok_or(StrataError::Closed { subsystem: Subsystem::Index })?;
        file.set_len(state.log.len() as u64).map_err(|source| io_err(&self.path, source))?;
        file.write_all_at(&state.log, 0).map_err(|source| io_err(&self.path, source))?;
        file.sync_all().map_err(|source| io_err(&self.path, source))?;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::Closed { subsystem: Subsystem::Index });
        }
        Ok(())
    }
}

fn append_record(log: &mut Vec<u8>, parent: i64, label: &str, assigned: i64) {
    put_i64_le(log, parent);
    put_u16_le(log, label.len() as u16);
    log.extend_from_slice(label.as_bytes());
    put_i64_le(log, assigned);
}

/// Replays the log from the start, stopping at the first incomplete
/// ("torn") trailing record. Returns the rebuilt trie, the next record
/// identifier to assign, and the byte length of the valid prefix.
#[allow(clippy::type_complexity)]
fn replay(bytes: &[u8]) -> (HashMap<i64, HashMap<String, i64>>, HashMap<i64, Vec<String>>, i64, usize) {
    let mut children: HashMap<i64, HashMap<String, i64>> = HashMap::new();
    let mut paths: HashMap<i64, Vec<String>> = HashMap::new();
    paths.insert(ROOT, Vec::new());
    let mut next_id = ROOT + 1;
    let mut offset = 0usize;

    while offset + HEADER_LEN <= bytes.len() {
        let Some(parent) = get_i64_le(&bytes[offset..offset + 8]) else { break };
        let Some(label_len) = get_u16_le(&bytes[offset + 8..offset + 10]) else { break };
        let label_len = label_len as usize;
        let label_start = offset + HEADER_LEN;
        let Some(label_end) = label_start.checked_add(label_len) else { break };
        let Some(record_end) = label_end.checked_add(8) else { break };
        if record_end > bytes.len() {
            break;
        }
        let Ok(label) = std::str::from_utf8(&bytes[label_start..label_end]) else { break };
        let Some(assigned) = get_i64_le(&bytes[label_end..record_end]) else { break };

        let mut path = paths.get(&parent).cloned().unwrap_or_default();
        path.push(label.to_string());
        children.entry(parent).or_default().insert(label.to_string(), assigned);
        paths.insert(assigned, path);
        next_id = next_id.max(assigned + 1);
        offset = record_end;
    }

    (children, paths, next_id, offset)
}

fn io_err(path: &Path, source: io::Error) -> StrataError {
    StrataError::Io { subsystem: Subsystem::Index, path: path.to_path_buf(), source }
}
