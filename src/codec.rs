use crate::records::{CompressionMethod, FLAG_DEFLATE_FAST, FLAG_DEFLATE_MAX};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Compresses bytes on their way to `W`.
pub(crate) enum Compressor<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Compressor<W> {
    pub(crate) fn new(method: CompressionMethod, level: u32, inner: W) -> io::Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Compressor::Stored(inner)),
            CompressionMethod::Deflated => Ok(Compressor::Deflate(DeflateEncoder::new(
                inner,
                Compression::new(level.clamp(1, 9)),
            ))),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unsupported compression method",
            )),
        }
    }

    /// Flushes the codec epilogue and returns the sink.
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Stored(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Compressor::Deflate(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(inner) => inner.write(buf),
            Compressor::Deflate(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Stored(inner) => inner.flush(),
            Compressor::Deflate(encoder) => encoder.flush(),
        }
    }
}

/// Inverse of [`Compressor`] for the reader.
pub(crate) enum Decompressor<R: Read> {
    Stored(R),
    Inflate(Box<DeflateDecoder<R>>),
}

impl<R: Read> Decompressor<R> {
    pub(crate) fn new(method: CompressionMethod, inner: R) -> io::Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(inner)),
            CompressionMethod::Deflated => Ok(Decompressor::Inflate(Box::new(DeflateDecoder::new(inner)))),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unsupported compression method",
            )),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(inner) => inner.read(buf),
            Decompressor::Inflate(decoder) => decoder.read(buf),
        }
    }
}

/// The method a compression level selects.
pub(crate) fn method_for_level(level: u32) -> CompressionMethod {
    if level == 0 {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    }
}

/// General purpose bits 1 and 2 describe the deflate effort.
pub(crate) fn level_flags(method: CompressionMethod, level: u32) -> u16 {
    match (method, level) {
        (CompressionMethod::Deflated, 8..) => FLAG_DEFLATE_MAX,
        (CompressionMethod::Deflated, 1..=2) => FLAG_DEFLATE_FAST,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CompressionMethod::Stored, 6)]
    #[case(CompressionMethod::Deflated, 1)]
    #[case(CompressionMethod::Deflated, 9)]
    fn test_codec_round_trip(#[case] method: CompressionMethod, #[case] level: u32) {
        let data = b"abcabcabcabcabcabcabcabc hello hello hello".repeat(20);
        let mut compressor = Compressor::new(method, level, Vec::new()).unwrap();
        compressor.write_all(&data).unwrap();
        let compressed = compressor.finish().unwrap();
        if method == CompressionMethod::Deflated {
            assert!(compressed.len() < data.len());
        }

        let mut out = Vec::new();
        Decompressor::new(method, compressed.as_slice())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[rstest]
    #[case(0, CompressionMethod::Stored, 0)]
    #[case(1, CompressionMethod::Deflated, FLAG_DEFLATE_FAST)]
    #[case(6, CompressionMethod::Deflated, 0)]
    #[case(9, CompressionMethod::Deflated, FLAG_DEFLATE_MAX)]
    fn test_level_mapping(#[case] level: u32, #[case] method: CompressionMethod, #[case] flags: u16) {
        assert_eq!(method_for_level(level), method);
        assert_eq!(level_flags(method, level), flags);
    }
}
