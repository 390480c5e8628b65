use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Length prefix plus checksum.
const FRAME_OVERHEAD: u64 = 8;

/// Frame a single event as `[u32 len][bincode][u32 crc32]`.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended first.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read the next intact frame payload. `None` on a clean end, a torn tail, or
/// a checksum mismatch; everything after the first bad frame is ignored.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Append-only write-ahead log of engine events, one file per network.
///
/// A torn final frame (crash mid-write) is dropped on replay, so every event
/// is either fully applied or not applied at all.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    /// Appends buffered since `committed_len` was taken.
    pending_appends: u64,
    /// A rollback was started and has not completed.
    needs_rollback: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            pending_appends: 0,
            needs_rollback: false,
        })
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.needs_rollback {
            self.rollback()?;
        }
        self.appends_since_compact += 1;
        self.pending_appends += 1;
        write_frame(&mut self.writer, event)
    }

    /// Make everything buffered so far durable. On error the caller must
    /// `rollback` before the batch can be reported as failed.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.sync_all()?;
        self.committed_len = file.metadata()?.len();
        self.pending_appends = 0;
        Ok(())
    }

    /// Discard every append since the last successful `flush_sync`, both the
    /// bytes still buffered and any that already reached the file.
    ///
    /// If this fails the log stays marked, and the next append retries the
    /// rollback before writing anything.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.needs_rollback = true;
        let fresh = BufWriter::new(self.writer.get_ref().try_clone()?);
        // into_parts hands back the unwritten buffer instead of flushing it
        let (file, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_appends);
        self.pending_appends = 0;
        self.needs_rollback = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a compacted history next to the live log and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen for append.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending_appends = 0;
        self.needs_rollback = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from disk. A missing file is an empty log.
    ///
    /// Bytes after the last intact frame are cut off so that new appends
    /// don't land behind garbage and get lost on the next replay.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += FRAME_OVERHEAD + payload.len() as u64;
        }
        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                dropped = file_len - valid_len,
                "truncating torn WAL tail"
            );
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Actor;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shelterbed_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn agency(name: &str) -> Event {
        Event::AgencyRegistered {
            id: Ulid::new(),
            name: name.into(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            agency("North Shelter Network"),
            Event::CaseRegistered {
                id: Ulid::new(),
                name: "J. Doe".into(),
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = agency("A1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn appends_after_torn_tail_survive() {
        let path = tmp_path("append_after_torn.wal");
        let first = agency("A1");
        let second = agency("A2");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[42u8, 0, 0]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first.clone()]);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let event = Event::RequestDeleted {
            id: Ulid::new(),
            actor: Actor::from_login("ops"),
            at: 0,
        };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_then_append.wal");
        let kept = agency("Kept");
        let later = agency("Later");
        {
            let mut wal = Wal::open(&path).unwrap();
            for i in 0..10 {
                wal.append(&agency(&format!("churn {i}"))).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(std::slice::from_ref(&kept)).unwrap();
            assert!(fs::metadata(&path).unwrap().len() < before);
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
    }

    #[test]
    fn buffered_appends_need_flush_sync() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..4).map(|i| agency(&format!("A{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 4);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn rollback_discards_unsynced_frames() {
        let path = tmp_path("rollback.wal");
        let committed = agency("Committed");
        let on_disk = agency("Flushed but not synced");
        let buffered = agency("Still buffered");
        let later = agency("Later");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&committed).unwrap();
            let committed_len = fs::metadata(&path).unwrap().len();

            // One frame reaches the file, the next stays in the buffer.
            wal.append_buffered(&on_disk).unwrap();
            wal.writer.flush().unwrap();
            wal.append_buffered(&buffered).unwrap();
            assert!(fs::metadata(&path).unwrap().len() > committed_len);

            wal.rollback().unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![committed, later]);
    }

    #[test]
    fn interrupted_rollback_completes_on_next_append() {
        let path = tmp_path("rollback_retry.wal");
        let committed = agency("Committed");
        let dropped = agency("Dropped");
        let later = agency("Later");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&committed).unwrap();
            wal.append_buffered(&dropped).unwrap();
            wal.writer.flush().unwrap();
            wal.needs_rollback = true;

            wal.append(&later).unwrap();
            assert!(!wal.needs_rollback);
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![committed, later]);
    }

    #[test]
    fn reopened_log_rolls_back_to_its_existing_length() {
        let path = tmp_path("rollback_reopen.wal");
        let first = agency("First");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_buffered(&agency("Lost")).unwrap();
            wal.writer.flush().unwrap();
            wal.rollback().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert_eq!(Wal::replay(&path).unwrap(), vec![first]);
    }
}
