//! Per-channel sample files. Each file holds raw interleaved fc32 samples (real then imaginary
//! part, native byte order), the layout UHD uses for host buffers.

use crate::Sample;
use log::error;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const BYTES_PER_SAMPLE: usize = 2 * std::mem::size_of::<f32>();

/// Insert the two-digit channel index in front of the extension, e.g. `data.dat` becomes
/// `data01.dat` for channel 1.
///
/// The suffix is added even when there is only one channel: callers on the host side always
/// look for numbered files.
pub fn channel_filename(base: &Path, _num_channels: usize, channel: usize) -> PathBuf {
    let mut name = base.file_stem().map(OsString::from).unwrap_or_default();
    name.push(format!("{:02}", channel));
    if let Some(ext) = base.extension() {
        name.push(".");
        name.push(ext);
    }
    base.with_file_name(name)
}

/// How a read of one channel buffer ended
#[derive(Debug)]
pub enum ReadStatus {
    /// The buffer was filled completely
    Full,
    /// The source ran dry before the buffer was full
    EndOfFile,
    Failed(io::Error),
}

#[derive(Debug)]
pub struct ChannelRead {
    /// Complete samples copied into the buffer
    pub num_samps: usize,
    pub status: ReadStatus,
}

/// Reads samples sequentially from one channel's source
pub struct SampleReader<R> {
    /// `None` if the file could not be opened. Every read then fails
    inner: Option<R>,
    scratch: Vec<u8>,
}

impl SampleReader<File> {
    /// Open `path` for reading. A failure is logged rather than returned, the reader will then
    /// report `ReadStatus::Failed` on first use
    pub fn open(path: &Path) -> Self {
        let inner = match File::open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                error!(
                    "Failed to open file {} ({})! Will not transmit",
                    path.display(),
                    e
                );
                None
            }
        };
        SampleReader {
            inner,
            scratch: Vec::new(),
        }
    }
}

impl<R: Read> SampleReader<R> {
    pub fn new(inner: R) -> Self {
        SampleReader {
            inner: Some(inner),
            scratch: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Fill as much of `buf` as the source allows. A trailing partial sample at the end of the
    /// source is discarded
    pub fn read(&mut self, buf: &mut [Sample]) -> ChannelRead {
        let inner = match self.inner.as_mut() {
            Some(r) => r,
            None => {
                return ChannelRead {
                    num_samps: 0,
                    status: ReadStatus::Failed(io::Error::new(
                        ErrorKind::NotFound,
                        "file was never opened",
                    )),
                }
            }
        };

        self.scratch.resize(buf.len() * BYTES_PER_SAMPLE, 0);
        let mut filled = 0;
        let mut status = ReadStatus::Full;
        while filled < self.scratch.len() {
            match inner.read(&mut self.scratch[filled..]) {
                Ok(0) => {
                    status = ReadStatus::EndOfFile;
                    break;
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    status = ReadStatus::Failed(e);
                    break;
                }
            }
        }

        let num_samps = filled / BYTES_PER_SAMPLE;
        decode_samples(&self.scratch[..num_samps * BYTES_PER_SAMPLE], &mut buf[..num_samps]);
        ChannelRead { num_samps, status }
    }
}

/// Appends samples to one channel's sink
pub struct SampleWriter<W> {
    inner: W,
    scratch: Vec<u8>,
}

impl SampleWriter<File> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(SampleWriter::new(File::create(path)?))
    }
}

impl<W: Write> SampleWriter<W> {
    pub fn new(inner: W) -> Self {
        SampleWriter {
            inner,
            scratch: Vec::new(),
        }
    }

    /// Write all of `samps` before returning
    pub fn write(&mut self, samps: &[Sample]) -> io::Result<()> {
        self.scratch.clear();
        encode_samples(samps, &mut self.scratch);
        self.inner.write_all(&self.scratch)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

fn decode_samples(bytes: &[u8], out: &mut [Sample]) {
    for (chunk, samp) in bytes.chunks_exact(BYTES_PER_SAMPLE).zip(out.iter_mut()) {
        let re = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let im = f32::from_ne_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        *samp = Sample::new(re, im);
    }
}

fn encode_samples(samps: &[Sample], out: &mut Vec<u8>) {
    out.reserve(samps.len() * BYTES_PER_SAMPLE);
    for s in samps {
        out.extend_from_slice(&s.re.to_ne_bytes());
        out.extend_from_slice(&s.im.to_ne_bytes());
    }
}
