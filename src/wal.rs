//! Write-ahead log.
//!
//! A partition appends every accepted insert batch here before applying it
//! in memory, so rows that were never persisted can be replayed after a
//! crash with [`WalReader`].

use crate::{DataPoint, Result, Row, TsmemError};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// WAL operation types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOperation {
    Insert = 1,
}

impl WalOperation {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WalOperation::Insert),
            _ => None,
        }
    }
}

/// One logged operation: an ordered batch of rows.
#[derive(Debug, Clone, Copy)]
pub struct WalEntry<'a> {
    pub operation: WalOperation,
    pub rows: &'a [Row],
}

impl<'a> WalEntry<'a> {
    /// Builds an insert entry for the given batch.
    pub fn insert(rows: &'a [Row]) -> Self {
        Self {
            operation: WalOperation::Insert,
            rows,
        }
    }
}

/// Trait for write-ahead log implementations.
///
/// Implementations must be safe to call from many partitions at once.
pub trait Wal: Send + Sync {
    /// Appends an entry to the log.
    fn append(&self, entry: &WalEntry<'_>) -> Result<()>;

    /// Flushes buffered data to disk.
    fn flush(&self) -> Result<()>;

    /// Punctuates the WAL (creates a new segment).
    fn punctuate(&self) -> Result<()>;

    /// Removes the oldest WAL segment.
    fn remove_oldest(&self) -> Result<()>;

    /// Removes all WAL segments.
    fn remove_all(&self) -> Result<()>;

    /// Refreshes the WAL (removes all and starts fresh).
    fn refresh(&self) -> Result<()>;
}

/// No-op WAL implementation.
pub struct NopWal;

impl Wal for NopWal {
    fn append(&self, _entry: &WalEntry<'_>) -> Result<()> {
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn punctuate(&self) -> Result<()> {
        Ok(())
    }

    fn remove_oldest(&self) -> Result<()> {
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

const WAL_SEGMENT_EXTENSION: &str = ".wal";
const MAX_WAL_METRIC_NAME_BYTES: usize = 4 * 1024 * 1024;
const MAX_CORRUPTED_ENTRIES: usize = 5;

/// Sync policy for WAL durability/performance tradeoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    /// Flush and fsync on every append call.
    PerAppend,
    /// Flush every append and fsync at most once per interval.
    Periodic(Duration),
}

impl Default for WalSyncMode {
    fn default() -> Self {
        WalSyncMode::Periodic(Duration::from_secs(1))
    }
}

fn parse_segment_index(name: &OsStr) -> Option<u32> {
    let trimmed = name.to_str()?.strip_suffix(WAL_SEGMENT_EXTENSION)?;
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<u32>().ok()
}

/// Lists the segment files of `dir`, oldest first.
fn list_segments(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file()
            && let Some(index) = path.file_name().and_then(parse_segment_index)
        {
            segments.push((index, path));
        }
    }

    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

/// Disk-based WAL made of numbered segment files.
pub struct DiskWal {
    dir: PathBuf,
    current_segment: Mutex<Option<BufWriter<File>>>,
    buffer_size: usize,
    segment_index: AtomicU32,
    sync_mode: WalSyncMode,
    last_sync: Mutex<Instant>,
}

impl DiskWal {
    /// Creates a new disk WAL.
    pub fn new(dir: impl AsRef<Path>, buffer_size: usize) -> Result<Arc<Self>> {
        Self::new_with_sync_mode(dir, buffer_size, WalSyncMode::default())
    }

    /// Creates a new disk WAL with an explicit sync mode.
    pub fn new_with_sync_mode(
        dir: impl AsRef<Path>,
        buffer_size: usize,
        sync_mode: WalSyncMode,
    ) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // Continue numbering after any segments left by a previous process
        let max_index = list_segments(&dir)?
            .last()
            .map(|(index, _)| *index)
            .unwrap_or(0);

        Ok(Arc::new(Self {
            dir,
            current_segment: Mutex::new(None),
            buffer_size,
            segment_index: AtomicU32::new(max_index + 1),
            sync_mode,
            last_sync: Mutex::new(Instant::now()),
        }))
    }

    /// Directory holding the segment files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_segment(&self) -> Result<BufWriter<File>> {
        let index = self.segment_index.fetch_add(1, Ordering::SeqCst);
        let path = self
            .dir
            .join(format!("{:06}{}", index, WAL_SEGMENT_EXTENSION));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(segment = %path.display(), "Opened WAL segment");

        Ok(if self.buffer_size > 0 {
            BufWriter::with_capacity(self.buffer_size, file)
        } else {
            BufWriter::new(file)
        })
    }

    fn maybe_sync_after_append(&self, writer: &mut BufWriter<File>) -> Result<()> {
        // Always flush userspace buffer so data reaches the kernel page cache.
        writer.flush()?;

        match self.sync_mode {
            WalSyncMode::Periodic(interval) if !interval.is_zero() => {
                let mut last_sync = self.last_sync.lock();
                if last_sync.elapsed() >= interval {
                    writer.get_ref().sync_all()?;
                    *last_sync = Instant::now();
                }
            }
            _ => {
                writer.get_ref().sync_all()?;
                *self.last_sync.lock() = Instant::now();
            }
        }

        Ok(())
    }

    fn sync_segment_now(&self, writer: &mut BufWriter<File>) -> Result<()> {
        writer.flush()?;
        writer.get_ref().sync_all()?;
        *self.last_sync.lock() = Instant::now();
        Ok(())
    }
}

impl Wal for DiskWal {
    fn append(&self, entry: &WalEntry<'_>) -> Result<()> {
        if entry.rows.is_empty() {
            return Ok(());
        }

        let mut current = self.current_segment.lock();
        if current.is_none() {
            *current = Some(self.open_segment()?);
        }
        let Some(writer) = current.as_mut() else {
            return Err(TsmemError::Wal {
                operation: "append".to_string(),
                details: "no open segment".to_string(),
            });
        };

        let mut buf = Vec::with_capacity(entry.rows.len() * 32);
        for row in entry.rows {
            encode_record(entry.operation, row, &mut buf);
        }
        writer.write_all(&buf)?;

        self.maybe_sync_after_append(writer)
    }

    fn flush(&self) -> Result<()> {
        if let Some(writer) = self.current_segment.lock().as_mut() {
            self.sync_segment_now(writer)?;
        }
        Ok(())
    }

    fn punctuate(&self) -> Result<()> {
        let mut current = self.current_segment.lock();
        if let Some(writer) = current.as_mut() {
            self.sync_segment_now(writer)?;
        }

        // Force creation of new segment on next write
        *current = None;
        Ok(())
    }

    fn remove_oldest(&self) -> Result<()> {
        let segments = list_segments(&self.dir)?;
        // Keep at least one segment so active/unflushed WAL data is never discarded.
        if segments.len() <= 1 {
            return Ok(());
        }

        if let Some((_, oldest)) = segments.first() {
            fs::remove_file(oldest)?;
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        // Drop the currently open writer before removing files.
        drop(self.current_segment.lock().take());

        for (_, segment) in list_segments(&self.dir)? {
            fs::remove_file(segment)?;
        }
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        self.remove_all()
    }
}

/// Record layout: opcode, uvarint metric length, metric bytes,
/// zigzag varint timestamp, uvarint of the value's f64 bits.
fn encode_record(operation: WalOperation, row: &Row, buf: &mut Vec<u8>) {
    let mut scratch = [0u8; 10];

    buf.push(operation as u8);

    let metric = row.metric().as_bytes();
    let n = encode_uvarint(metric.len() as u64, &mut scratch);
    buf.extend_from_slice(&scratch[..n]);
    buf.extend_from_slice(metric);

    let n = encode_varint(row.timestamp(), &mut scratch);
    buf.extend_from_slice(&scratch[..n]);

    let n = encode_uvarint(row.value().to_bits(), &mut scratch);
    buf.extend_from_slice(&scratch[..n]);
}

/// WAL Reader for recovery.
pub struct WalReader {
    dir: PathBuf,
    rows: Vec<Row>,
}

impl WalReader {
    /// Creates a new WAL reader.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            rows: Vec::new(),
        })
    }

    /// Reads all WAL segments and returns the recovered rows in log order.
    pub fn read_all(mut self) -> Result<Vec<Row>> {
        let segments = list_segments(&self.dir)?;
        debug!(
            segments = segments.len(),
            wal_dir = %self.dir.display(),
            "Recovering WAL segments"
        );

        let mut failed_segments = 0usize;
        for (index, path) in segments {
            if let Err(e) = self.read_segment(&path) {
                warn!(segment_index = index, "Error reading WAL segment {:?}: {}", path, e);
                failed_segments += 1;
            }
        }

        if failed_segments > 0 {
            warn!(
                failed_segments,
                recovered_rows = self.rows.len(),
                "WAL recovery completed with segment failures"
            );
        }

        Ok(self.rows)
    }

    fn read_segment(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            debug!(segment = %path.display(), "Skipping empty WAL segment");
            return Ok(());
        }

        let mut reader = BufReader::new(file);
        let mut corrupted_entries = 0usize;

        loop {
            let mut op_buf = [0u8; 1];
            match reader.read_exact(&mut op_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let Some(op) = WalOperation::from_u8(op_buf[0]) else {
                warn!(opcode = op_buf[0], segment = %path.display(), "Unknown WAL operation");
                corrupted_entries += 1;
                if corrupted_entries > MAX_CORRUPTED_ENTRIES {
                    return Err(TsmemError::Wal {
                        operation: "segment_read".to_string(),
                        details: format!("Too many corrupted entries in {:?}", path),
                    });
                }
                continue;
            };

            match op {
                WalOperation::Insert => {
                    // A truncated tail is an interrupted append; stop there.
                    let Ok(metric_len) = decode_uvarint(&mut reader) else {
                        break;
                    };
                    if metric_len as usize > MAX_WAL_METRIC_NAME_BYTES {
                        return Err(TsmemError::Wal {
                            operation: "segment_read".to_string(),
                            details: format!(
                                "metric length {} exceeds limit in {:?}",
                                metric_len, path
                            ),
                        });
                    }

                    let mut metric_buf = vec![0u8; metric_len as usize];
                    if reader.read_exact(&mut metric_buf).is_err() {
                        break;
                    }
                    let metric = String::from_utf8(metric_buf).map_err(|e| TsmemError::Wal {
                        operation: "segment_read".to_string(),
                        details: format!("metric name is not UTF-8: {}", e),
                    })?;

                    let Ok(timestamp) = decode_varint(&mut reader) else {
                        break;
                    };
                    let Ok(value_bits) = decode_uvarint(&mut reader) else {
                        break;
                    };

                    self.rows.push(Row::new(
                        metric,
                        DataPoint::new(timestamp, f64::from_bits(value_bits)),
                    ));
                }
            }
        }

        Ok(())
    }
}

// Varint encoding/decoding functions
fn encode_varint(value: i64, buf: &mut [u8]) -> usize {
    // Zigzag encode
    let uvalue = ((value << 1) ^ (value >> 63)) as u64;
    encode_uvarint(uvalue, buf)
}

fn encode_uvarint(mut value: u64, buf: &mut [u8]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

fn decode_varint<R: Read>(reader: &mut R) -> Result<i64> {
    let uvalue = decode_uvarint(reader)?;
    // Zigzag decode
    Ok(((uvalue >> 1) as i64) ^ -((uvalue & 1) as i64))
}

fn decode_uvarint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;

        result |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;

        if shift >= 64 {
            return Err(TsmemError::Wal {
                operation: "decode".to_string(),
                details: "varint overflow".to_string(),
            });
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_extremes() {
        for value in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            let mut buf = [0u8; 10];
            let n = encode_varint(value, &mut buf);
            let decoded = decode_varint(&mut Cursor::new(&buf[..n])).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_decode_uvarint_overflow() {
        let bytes = [0xFFu8; 11];
        assert!(decode_uvarint(&mut Cursor::new(&bytes[..])).is_err());
    }

    #[test]
    fn test_parse_segment_index() {
        assert_eq!(parse_segment_index(OsStr::new("000012.wal")), Some(12));
        assert_eq!(parse_segment_index(OsStr::new(".wal")), None);
        assert_eq!(parse_segment_index(OsStr::new("abc.wal")), None);
        assert_eq!(parse_segment_index(OsStr::new("000012.log")), None);
    }

    #[test]
    fn test_record_layout() {
        let row = Row::new("m", DataPoint::new(-1, 0.0));
        let mut buf = Vec::new();
        encode_record(WalOperation::Insert, &row, &mut buf);
        // opcode, len=1, 'm', zigzag(-1)=1, bits(0.0)=0
        assert_eq!(buf, vec![1, 1, b'm', 1, 0]);
    }
}
