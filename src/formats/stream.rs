///! Fixed-size record streams - the on-disk stand-in for out-of-core arrays
///!
///! Format: *.stream / *.bnd (little-endian)
///!
///! Header (32 bytes):
///!   magic:       u32 = 0x54435354  // "TCST"
///!   version:     u16 = 1
///!   kind:        u16               // record type tag
///!   record_size: u32
///!   reserved:    u32
///!   count:       u64
///!   body_crc64:  u64
///!
///! Body: `count` records of `record_size` bytes.
///!
///! Access is sequential apart from explicit seeks to a record index.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use super::crc::{Digest, DigestWriter};
use crate::core::{Error, Result};

const MAGIC: u32 = 0x54435354; // "TCST"
const VERSION: u16 = 1;
pub const HEADER_SIZE: u64 = 32;
const COUNT_OFFSET: u64 = 16;

/// A fixed-size little-endian record
pub trait Record: Copy {
    const SIZE: usize;
    /// Type tag stored in the header so a stream cannot be opened as the wrong record type
    const KIND: u16;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// Record count and body checksum of a finished stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub records: u64,
    pub crc64: u64,
}

fn encode_header(kind: u16, record_size: u32, count: u64, crc64: u64) -> [u8; HEADER_SIZE as usize] {
    let mut h = [0u8; HEADER_SIZE as usize];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..6].copy_from_slice(&VERSION.to_le_bytes());
    h[6..8].copy_from_slice(&kind.to_le_bytes());
    h[8..12].copy_from_slice(&record_size.to_le_bytes());
    h[16..24].copy_from_slice(&count.to_le_bytes());
    h[24..32].copy_from_slice(&crc64.to_le_bytes());
    h
}

/// Append-only writer; `create` truncates any existing file
pub struct RecordWriter<T: Record> {
    path: PathBuf,
    writer: DigestWriter<BufWriter<File>>,
    count: u64,
    buf: Vec<u8>,
    _record: PhantomData<T>,
}

impl<T: Record> RecordWriter<T> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufWriter::new(File::create(&path)?);
        file.write_all(&encode_header(T::KIND, T::SIZE as u32, 0, 0))?;
        Ok(Self {
            path,
            writer: DigestWriter::new(file),
            count: 0,
            buf: vec![0u8; T::SIZE],
            _record: PhantomData,
        })
    }

    pub fn append(&mut self, record: &T) -> Result<()> {
        record.encode(&mut self.buf);
        self.writer.write_all(&self.buf)?;
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the body and commit count + checksum into the header
    pub fn finish(self) -> Result<StreamSummary> {
        let (writer, crc64) = self.writer.finish();
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.write_all(&crc64.to_le_bytes())?;
        file.flush()?;
        Ok(StreamSummary {
            records: self.count,
            crc64,
        })
    }
}

/// Sequential reader with record-granular seeking
pub struct RecordReader<T: Record> {
    path: PathBuf,
    reader: BufReader<File>,
    len: u64,
    pos: u64,
    crc64: u64,
    buf: Vec<u8>,
    _record: PhantomData<T>,
}

impl<T: Record> RecordReader<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_SIZE as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| Error::format(&path, "truncated header"))?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != MAGIC {
            return Err(Error::format(&path, format!("bad magic {magic:#010x}")));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(Error::format(&path, format!("unsupported version {version}")));
        }
        let kind = u16::from_le_bytes([header[6], header[7]]);
        let record_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if kind != T::KIND || record_size as usize != T::SIZE {
            return Err(Error::format(
                &path,
                format!(
                    "record kind {kind}/size {record_size}, expected kind {}/size {}",
                    T::KIND,
                    T::SIZE
                ),
            ));
        }
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[16..24]);
        let len = u64::from_le_bytes(count_bytes);
        let mut crc_bytes = [0u8; 8];
        crc_bytes.copy_from_slice(&header[24..32]);
        let crc64 = u64::from_le_bytes(crc_bytes);

        let expected = HEADER_SIZE + len * T::SIZE as u64;
        if file_len != expected {
            return Err(Error::format(
                &path,
                format!("file is {file_len} bytes, header promises {expected}"),
            ));
        }

        Ok(Self {
            path,
            reader,
            len,
            pos: 0,
            crc64,
            buf: vec![0u8; T::SIZE],
            _record: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the next record `read_next` returns
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            records: self.len,
            crc64: self.crc64,
        }
    }

    pub fn read_next(&mut self) -> Result<Option<T>> {
        if self.pos >= self.len {
            return Ok(None);
        }
        self.reader.read_exact(&mut self.buf)?;
        self.pos += 1;
        Ok(Some(T::decode(&self.buf)))
    }

    /// Position the reader so the next read returns record `index`
    pub fn seek(&mut self, index: u64) -> Result<()> {
        if index > self.len {
            return Err(Error::invariant(format!(
                "seek to record {index} past end of {} ({} records)",
                self.path.display(),
                self.len
            )));
        }
        if index != self.pos {
            self.reader
                .seek(SeekFrom::Start(HEADER_SIZE + index * T::SIZE as u64))?;
            self.pos = index;
        }
        Ok(())
    }

    /// Read exactly `n` records; a short stream is an invariant violation
    pub fn read_exact_records(&mut self, n: u64, out: &mut Vec<T>) -> Result<()> {
        for read in 0..n {
            match self.read_next()? {
                Some(rec) => out.push(rec),
                None => {
                    return Err(Error::invariant(format!(
                        "{} exhausted: expected {n} records from index {}, got {read}",
                        self.path.display(),
                        self.pos - read
                    )))
                }
            }
        }
        Ok(())
    }
}

impl<T: Record> Iterator for RecordReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Read a whole stream into memory
pub fn read_all<T: Record, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let reader = RecordReader::<T>::open(path)?;
    let mut out = Vec::with_capacity(reader.len() as usize);
    for rec in reader {
        out.push(rec?);
    }
    Ok(out)
}

/// Write a slice of records as a complete stream
pub fn write_all<T: Record, P: AsRef<Path>>(path: P, records: &[T]) -> Result<StreamSummary> {
    let mut writer = RecordWriter::<T>::create(path)?;
    for rec in records {
        writer.append(rec)?;
    }
    writer.finish()
}

/// Re-scan a stream body and compare its checksum with the header
pub fn verify<T: Record, P: AsRef<Path>>(path: P) -> Result<StreamSummary> {
    let path = path.as_ref();
    let mut reader = RecordReader::<T>::open(path)?;
    let mut digest = Digest::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut remaining = reader.len() * T::SIZE as u64;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        reader.reader.read_exact(&mut buf[..chunk])?;
        digest.update(&buf[..chunk]);
        remaining -= chunk as u64;
    }
    let crc64 = digest.finalize();
    let summary = reader.summary();
    if crc64 != summary.crc64 {
        return Err(Error::format(
            path,
            format!("body crc64 {crc64:#018x}, header says {:#018x}", summary.crc64),
        ));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GridPoint, IjCost};
    use tempfile::TempDir;

    fn sample(n: u32) -> Vec<IjCost> {
        (0..n)
            .map(|i| IjCost::new(GridPoint::new(i / 7, i % 7), i as f32 * 0.5))
            .collect()
    }

    #[test]
    fn test_append_then_read_sequentially() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s2b.stream");
        let records = sample(50);
        let summary = write_all(&path, &records).unwrap();
        assert_eq!(summary.records, 50);

        let back: Vec<IjCost> = read_all(&path).unwrap();
        assert_eq!(back, records);
        assert_eq!(verify::<IjCost, _>(&path).unwrap(), summary);
    }

    #[test]
    fn test_seek_to_record_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seek.stream");
        let records = sample(20);
        write_all(&path, &records).unwrap();

        let mut reader = RecordReader::<IjCost>::open(&path).unwrap();
        reader.seek(13).unwrap();
        assert_eq!(reader.read_next().unwrap(), Some(records[13]));
        reader.seek(2).unwrap();
        assert_eq!(reader.position(), 2);
        assert_eq!(reader.read_next().unwrap(), Some(records[2]));
        reader.seek(20).unwrap();
        assert_eq!(reader.read_next().unwrap(), None);
        assert!(reader.seek(21).unwrap_err().is_invariant());
    }

    #[test]
    fn test_empty_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.stream");
        let summary = RecordWriter::<f32>::create(&path).unwrap().finish().unwrap();
        assert_eq!(summary.records, 0);
        let reader = RecordReader::<f32>::open(&path).unwrap();
        assert!(reader.is_empty());
    }

    #[test]
    fn test_wrong_record_kind_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kind.stream");
        write_all(&path, &[1.0f32, 2.0]).unwrap();
        let err = RecordReader::<IjCost>::open(&path).err().unwrap();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.stream");
        write_all(&path, &sample(4)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            RecordReader::<IjCost>::open(&path).err().unwrap(),
            Error::Format { .. }
        ));
    }

    #[test]
    fn test_verify_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flip.stream");
        write_all(&path, &sample(8)).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            verify::<IjCost, _>(&path).unwrap_err(),
            Error::Format { .. }
        ));
    }
}
