use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use quorum_core::error::{Error, Result};

use crate::raft::{NodeId, Term};

/// The durable `{term, voted_for}` record. Only ever rewritten whole, so a
/// reader sees either the old record or the new one, never a mix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<NodeId>,
}

/// File-backed hard state, one record per node. `update` writes a temp
/// file, fsyncs, and renames it over the record, so a crash mid-write never
/// leaves partial state visible. If `update` returns `Ok`, a restart
/// observes at least those values.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    state: HardState,
    persisted: bool,
}

impl Storage {
    pub fn open(dir: &Path, id: &NodeId) -> Result<Storage> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.state", file_stem(id)));
        let (state, persisted) = match fs::read(&path) {
            Ok(bytes) => {
                let state = bincode::deserialize(&bytes)
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                (state, true)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => (HardState::default(), false),
            Err(e) => return Err(e.into()),
        };
        Ok(Storage {
            path,
            state,
            persisted,
        })
    }

    /// Whether a record has ever been written — first-boot detection.
    pub fn exists(&self) -> bool {
        self.persisted
    }

    pub fn term(&self) -> Term {
        self.state.term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.state.voted_for.as_ref()
    }

    /// Durably replace the record. Flushed to disk before returning.
    pub fn update(&mut self, term: Term, voted_for: Option<NodeId>) -> Result<()> {
        let next = HardState { term, voted_for };
        let bytes = bincode::serialize(&next).map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.state = next;
        self.persisted = true;
        Ok(())
    }
}

/// Node ids are `host:port`; keep the colon out of file names.
pub(crate) fn file_stem(id: &NodeId) -> String {
    id.replace(':', "_")
}
