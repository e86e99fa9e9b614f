use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Upper bound on one encoded event. A length prefix above this is corruption.
const MAX_ENTRY_BYTES: usize = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_ENTRY_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "journal entry too large"));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read `buf.len()` bytes, or report a clean/torn end of file as `Ok(false)`.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What a replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte offset just past the last intact entry.
    pub valid_len: u64,
    /// Bytes after `valid_len` that were torn or corrupt.
    pub discarded_bytes: u64,
}

/// The file a journal appends to.
pub trait LogFile: Write {
    fn sync(&self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only journal file of office and reservation events.
///
/// Entry format: `[u32 len][bincode Event][u32 crc32]`, little endian. A torn
/// or corrupt tail (crash mid-write) ends the replay and is cut off when the
/// file is reopened, so new appends never land behind garbage.
///
/// Appends collect in memory until `flush_sync`. A failed flush cuts the file
/// back to the last synced length and drops the pending bytes, so nothing a
/// caller saw fail can surface in a later flush.
pub struct Wal<F = File> {
    file: F,
    pending: Vec<u8>,
    pending_appends: u64,
    synced_len: u64,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay `path`, truncate any damaged tail, and open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if replay.discarded_bytes > 0 {
            warn!(
                "journal {}: discarding {} damaged trailing bytes",
                path.display(),
                replay.discarded_bytes
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, replay.events))
    }

    /// Open (or create) the journal at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self::over(file, synced_len, path.to_path_buf()))
    }

    /// Replace the journal with `events`: write a synced temp file, then
    /// rename it over the live one and reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        let compacted_len = {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
            tmp.get_ref().metadata()?.len()
        };
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = compacted_len;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact entry of `path`. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_ENTRY_BYTES {
                break;
            }

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += (4 + len + 4) as u64;
        }

        replay.discarded_bytes = total_len - replay.valid_len;
        Ok(replay)
    }
}

impl<F: LogFile> Wal<F> {
    fn over(file: F, synced_len: u64, path: PathBuf) -> Self {
        Self {
            file,
            pending: Vec::new(),
            pending_appends: 0,
            synced_len,
            path,
            appends_since_compact: 0,
        }
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let mut entry = Vec::new();
        encode_event(&mut entry, event)?;
        self.pending.extend_from_slice(&entry);
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Write pending events and fsync. On failure the pending events are
    /// discarded and the file is cut back to its last synced length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync());
        match written {
            Ok(()) => {
                self.synced_len += self.pending.len() as u64;
                self.pending.clear();
                self.pending_appends = 0;
                Ok(())
            }
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    /// Drop everything appended since the last successful flush.
    pub fn discard_pending(&mut self) {
        self.appends_since_compact -= self.pending_appends;
        self.pending.clear();
        self.pending_appends = 0;
        if let Err(e) = self.file.truncate(self.synced_len) {
            warn!(
                "journal {}: rollback to {} bytes failed: {e}",
                self.path.display(),
                self.synced_len
            );
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
