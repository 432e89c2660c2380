use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use quorum_core::error::{Error, Result};

use crate::codec::Serializer;
use crate::fsm::Command;
use crate::raft::{LogIndex, NodeId, Term};
use crate::storage::file_stem;

/// One record in the replicated log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Position in the log, 1-based and contiguous.
    pub index: LogIndex,
    /// Leader term at append time.
    pub term: Term,
    /// The key-value assignment this entry applies.
    pub command: Command,
}

/// The durable ordered entry log. Records are length-prefixed codec frames
/// in one append-only file, mirrored whole in memory. Appends are fsynced
/// before they return, so an entry a follower has acknowledged (or a leader
/// counts as its own) survives a crash.
///
/// `commit_index` and `last_applied` are volatile: a restart rebuilds both
/// at zero and the state machine re-applies from the start.
#[derive(Debug)]
pub struct RaftLog {
    file: File,
    entries: Vec<Entry>,
    /// Byte offset of each record, for truncation on conflict.
    offsets: Vec<u64>,
    /// File length up to the last whole record.
    end: u64,
    serializer: Serializer,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
}

impl RaftLog {
    /// Open (or create) the log file and replay it. A torn final record
    /// from a crashed append is discarded and the file truncated back to
    /// the last whole record.
    pub fn open(dir: &Path, id: &NodeId, serializer: Serializer) -> Result<RaftLog> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", file_stem(id)));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let mut entries: Vec<Entry> = Vec::new();
        let mut offsets = Vec::new();
        let mut pos = 0usize;
        while raw.len() - pos >= 4 {
            let mut prefix = &raw[pos..pos + 4];
            let len = prefix.get_u32_le() as usize;
            if raw.len() - pos - 4 < len {
                break;
            }
            let entry: Entry = match serializer.unpack(&raw[pos + 4..pos + 4 + len]) {
                Ok(entry) => entry,
                Err(_) => break,
            };
            if entry.index != entries.len() as u64 + 1 {
                return Err(Error::LogCorrupt(format!(
                    "record at offset {} has index {}, expected {}",
                    pos,
                    entry.index,
                    entries.len() + 1
                )));
            }
            offsets.push(pos as u64);
            entries.push(entry);
            pos += 4 + len;
        }
        if pos < raw.len() {
            file.set_len(pos as u64)?;
            file.sync_all()?;
        }

        Ok(RaftLog {
            file,
            entries,
            offsets,
            end: pos as u64,
            serializer,
            commit_index: 0,
            last_applied: 0,
        })
    }

    /// Append at `last_log_index + 1`. Durable before returning.
    pub fn append(&mut self, term: Term, command: Command) -> Result<Entry> {
        let entry = Entry {
            index: self.last_log_index() + 1,
            term,
            command,
        };
        let payload = self.serializer.pack(&entry)?;
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(&payload);

        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;

        self.offsets.push(self.end);
        self.end += frame.len() as u64;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// The entry at `index`, 1-based.
    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    /// Drop the entry at `index` and everything after it. Followers call
    /// this before accepting a conflicting suffix from the leader.
    pub fn erase_from(&mut self, index: LogIndex) -> Result<()> {
        if index == 0 || index > self.last_log_index() {
            return Ok(());
        }
        let keep = index as usize - 1;
        let cut = self.offsets[keep];
        self.file.set_len(cut)?;
        self.file.sync_all()?;
        self.entries.truncate(keep);
        self.offsets.truncate(keep);
        self.end = cut;
        Ok(())
    }

    pub fn last_log_index(&self) -> LogIndex {
        self.entries.len() as LogIndex
    }

    /// Term of the last entry, 0 for an empty log.
    pub fn last_log_term(&self) -> Term {
        self.entries.last().map(|entry| entry.term).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
