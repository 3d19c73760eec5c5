//! Zip archives read through HTTP range requests, so single members can be
//! pulled out of large remote archives without downloading them.

use log::debug;
use reqwest::{
    blocking::Client,
    header::{CONTENT_LENGTH, RANGE},
    StatusCode,
};
use std::io::{self, Read, Seek, SeekFrom};
use zip::{result::ZipError, ZipArchive};

use crate::error::{Error, Result};

const READ_AHEAD: usize = 64 * 1024;

/// Random access to a fixed-size blob.
pub trait RangeSource {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads the half-open byte range `start..end`.
    fn fetch(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

/// A remote file that supports `Range` requests.
pub struct HttpRangeSource {
    client: Client,
    url: String,
    size: u64,
}

fn http_io_error(e: reqwest::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl HttpRangeSource {
    pub fn new(client: Client, url: &str) -> Result<Self> {
        let res = client.head(url).send()?.error_for_status()?;

        // `content_length()` is empty for HEAD responses
        let size = res
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} did not report its size", url),
                ))
            })?;

        Ok(Self {
            client,
            url: url.to_owned(),
            size,
        })
    }
}

impl RangeSource for HttpRangeSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn fetch(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        debug!("fetching bytes {}-{} of {}", start, end, self.url);

        let res = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", start, end - 1))
            .send()
            .map_err(http_io_error)?;

        if res.status() != StatusCode::PARTIAL_CONTENT {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("range request to {} answered with {}", self.url, res.status()),
            ));
        }

        Ok(res.bytes().map_err(http_io_error)?.to_vec())
    }
}

/// `Read + Seek` over a [`RangeSource`] with a read-ahead buffer.
pub struct RangeReader<S> {
    source: S,
    pos: u64,
    buf_start: u64,
    buf: Vec<u8>,
    chunk: usize,
}

impl<S: RangeSource> RangeReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_chunk_size(source, READ_AHEAD)
    }

    pub fn with_chunk_size(source: S, chunk: usize) -> Self {
        Self {
            source,
            pos: 0,
            buf_start: 0,
            buf: Vec::new(),
            chunk: chunk.max(1),
        }
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn buffered(&self) -> bool {
        self.pos >= self.buf_start && self.pos < self.buf_start + self.buf.len() as u64
    }
}

impl<S: RangeSource> Read for RangeReader<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let size = self.source.size();
        if out.is_empty() || self.pos >= size {
            return Ok(0);
        }

        if !self.buffered() {
            let want = self.chunk.max(out.len()) as u64;
            let end = (self.pos + want).min(size);
            self.buf = self.source.fetch(self.pos, end)?;
            self.buf_start = self.pos;
            if self.buf.is_empty() {
                return Ok(0);
            }
        }

        let offset = (self.pos - self.buf_start) as usize;
        let n = out.len().min(self.buf.len() - offset);
        out[..n].copy_from_slice(&self.buf[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: RangeSource> Seek for RangeReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.source.size().checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };

        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

/// A zip archive whose bytes are fetched on demand.
pub struct RemoteZip<S: RangeSource> {
    archive: ZipArchive<RangeReader<S>>,
}

impl RemoteZip<HttpRangeSource> {
    /// Opens the archive at `url`, reading only its central directory.
    pub fn open_url(client: Client, url: &str) -> Result<Self> {
        Self::open(HttpRangeSource::new(client, url)?)
    }
}

impl<S: RangeSource> RemoteZip<S> {
    pub fn open(source: S) -> Result<Self> {
        let archive = ZipArchive::new(RangeReader::new(source))?;
        Ok(Self { archive })
    }

    /// Member names in archive order.
    pub fn names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_owned).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    /// Reads one member, or `None` if the archive has no such member.
    pub fn read(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        Ok(Some(content))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::{write::FileOptions, CompressionMethod, ZipWriter};

    pub(crate) struct MemorySource {
        pub data: Vec<u8>,
        pub fetches: usize,
    }

    impl MemorySource {
        pub fn new(data: Vec<u8>) -> Self {
            Self { data, fetches: 0 }
        }
    }

    impl RangeSource for MemorySource {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn fetch(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
            self.fetches += 1;
            Ok(self.data[start as usize..end as usize].to_vec())
        }
    }

    fn archive() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

        writer.start_file("maps/n37-001.gif", stored).unwrap();
        writer.write_all(&[7u8; 5000]).unwrap();
        writer.start_file("maps/n37-001.map", deflated).unwrap();
        writer.write_all(b"OziExplorer Map Data File").unwrap();
        writer.start_file("readme.html", stored).unwrap();
        writer.write_all(b"<html></html>").unwrap();

        writer.finish().unwrap().into_inner()
    }

    fn source() -> MemorySource {
        MemorySource {
            data: archive(),
            fetches: 0,
        }
    }

    #[test]
    fn reader_reads_across_chunks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut reader = RangeReader::with_chunk_size(
            MemorySource {
                data: data.clone(),
                fetches: 0,
            },
            64,
        );

        reader.seek(SeekFrom::Start(100)).unwrap();
        let mut out = vec![0u8; 10];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, data[100..110]);

        reader.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, data[995..]);

        assert!(reader.seek(SeekFrom::Current(-2000)).is_err());
        assert_eq!(reader.into_inner().fetches, 2);
    }

    #[test]
    fn lists_and_reads_members() {
        let mut zip = RemoteZip::open(source()).unwrap();
        assert_eq!(
            zip.names(),
            vec!["maps/n37-001.gif", "maps/n37-001.map", "readme.html"]
        );
        assert!(zip.contains("maps/n37-001.map"));

        let map = zip.read("maps/n37-001.map").unwrap().unwrap();
        assert_eq!(map, b"OziExplorer Map Data File");
        let gif = zip.read("maps/n37-001.gif").unwrap().unwrap();
        assert_eq!(gif.len(), 5000);
    }

    #[test]
    fn missing_member_is_none() {
        let mut zip = RemoteZip::open(source()).unwrap();
        assert!(zip.read("maps/other.gif").unwrap().is_none());
    }
}
