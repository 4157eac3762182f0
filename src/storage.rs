use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use tracing::warn;

// Anything larger than this in a length prefix is corruption, not a record.
const MAX_ENTRY_BYTES: usize = 64 * 1024 * 1024;

/// One version of a record in the segment log.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct SegmentEntry {
    pub identifier: String,
    /// JSON encoded `Record`
    pub payload: Vec<u8>,
}

/// Append-only log of `[Length (4b)][rkyv entry (N bytes)]` frames.
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
    strict: bool,
}

impl Segment {
    /// Open or create the log. `strict` fsyncs after every append.
    pub fn open(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            current_offset,
            strict,
        })
    }

    pub fn len(&self) -> u64 {
        self.current_offset
    }

    pub fn is_empty(&self) -> bool {
        self.current_offset == 0
    }

    pub fn append(&mut self, entry: &SegmentEntry) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 4096>(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        // The handle appends at the real end of file, so offsets come from there too.
        let start = self.file.metadata()?.len();
        let len = bytes.len() as u32;

        // Single write so a crash leaves at most one torn frame at the tail.
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);
        if let Err(e) = self.write_frame(&frame) {
            self.discard_from(start);
            return Err(e);
        }

        self.current_offset = start + frame.len() as u64;
        Ok(start)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        if self.strict {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut off whatever a failed append left past `start`.
    fn discard_from(&mut self, start: u64) {
        if let Err(e) = self.file.set_len(start) {
            warn!(path = %self.file_path.display(), offset = start, error = %e, "cannot truncate failed append");
        }
        self.current_offset = start;
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn read(&self, offset: u64) -> io::Result<SegmentEntry> {
        // Cloned handle for reads; appends always land at the end regardless of the cursor.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_ENTRY_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame at {} claims {} bytes", offset, len),
            ));
        }

        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        decode(&bytes)
    }

    /// Scan every frame from the start, dropping a torn tail left by a crash.
    ///
    /// Frames that are complete but fail validation are skipped with a warning.
    pub fn recover(&mut self) -> io::Result<Vec<(u64, SegmentEntry)>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_ENTRY_BYTES {
                warn!(offset, len, "corrupt frame length, truncating segment");
                break;
            }

            let mut bytes = vec![0u8; len];
            match reader.read_exact(&mut bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            match decode(&bytes) {
                Ok(entry) => entries.push((offset, entry)),
                Err(e) => warn!(offset, error = %e, "skipping undecodable frame"),
            }
            offset += 4 + len as u64;
        }

        if offset < self.current_offset {
            warn!(
                path = %self.file_path.display(),
                valid = offset,
                length = self.current_offset,
                "dropping torn tail"
            );
            self.file.set_len(offset)?;
            self.current_offset = offset;
        }

        Ok(entries)
    }
}

fn decode(bytes: &[u8]) -> io::Result<SegmentEntry> {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<SegmentEntry>(&aligned)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    archived
        .deserialize(&mut rkyv::Infallible)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "entry deserialization failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: &str, payload: &str) -> SegmentEntry {
        SegmentEntry {
            identifier: id.to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_append_then_read() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(&dir.path().join("records.seg"), false).unwrap();

        let first = segment.append(&entry("a", "{}")).unwrap();
        let second = segment.append(&entry("b", "{\"x\":1}")).unwrap();

        assert_eq!(first, 0);
        assert!(second > first);
        assert_eq!(segment.read(second).unwrap(), entry("b", "{\"x\":1}"));
        assert_eq!(segment.read(first).unwrap(), entry("a", "{}"));
    }

    #[test]
    fn test_append_after_leftover_bytes_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.seg");
        let mut segment = Segment::open(&path, false).unwrap();
        let first = segment.append(&entry("a", "1")).unwrap();
        let after_first = segment.len();

        // Half a frame from an append that failed midway.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[7; 10]).unwrap();
        }

        let second = segment.append(&entry("b", "2")).unwrap();
        assert_eq!(second, after_first + 14);
        assert_eq!(segment.len(), std::fs::metadata(&path).unwrap().len());
        assert_eq!(segment.read(second).unwrap(), entry("b", "2"));
        assert_eq!(segment.read(first).unwrap(), entry("a", "1"));
    }

    #[test]
    fn test_discard_truncates_partial_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.seg");
        let mut segment = Segment::open(&path, false).unwrap();
        segment.append(&entry("a", "1")).unwrap();
        let good_len = segment.len();

        segment.write_frame(&[9; 6]).unwrap();
        segment.discard_from(good_len);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        let offset = segment.append(&entry("b", "2")).unwrap();
        assert_eq!(offset, good_len);
        assert_eq!(segment.read(offset).unwrap(), entry("b", "2"));
    }

    #[test]
    fn test_reopen_appends_after_existing_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.seg");

        {
            let mut segment = Segment::open(&path, true).unwrap();
            segment.append(&entry("a", "1")).unwrap();
        }

        let mut segment = Segment::open(&path, true).unwrap();
        let offset = segment.append(&entry("b", "2")).unwrap();
        assert!(offset > 0);

        let entries = segment.recover().unwrap();
        let ids: Vec<&str> = entries.iter().map(|(_, e)| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_recover_drops_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.seg");

        let good_len = {
            let mut segment = Segment::open(&path, false).unwrap();
            segment.append(&entry("a", "1")).unwrap();
            segment.len()
        };

        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&200u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let mut segment = Segment::open(&path, false).unwrap();
        let entries = segment.recover().unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(segment.len(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }
}
