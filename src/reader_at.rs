/// Provides reading bytes at a specific offset
///
/// This trait is similar to [`std::io::Read`] but with an additional offset
/// parameter that signals where the read should begin offset from the start of
/// the data. Reads through a shared reference let the updater inspect an
/// archive while it holds the same handle for writing.
///
/// This trait is modelled after Go's
/// [`io.ReaderAt`](https://pkg.go.dev/io#ReaderAt) interface.
pub trait ReaderAt {
    /// Read bytes from the reader at a specific offset
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;

    /// Sibling to [`read_exact`](std::io::Read::read_exact), but at an offset
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        let mut read = 0;
        while read < buf.len() {
            let latest = self.read_at(&mut buf[read..], offset + (read as u64))?;
            if latest == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            read += latest;
        }
        Ok(())
    }
}

pub(crate) trait ReaderAtExt {
    /// Reads until `buffer` is full or the data ends, returning the count.
    fn read_at_most_at(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize>;

    /// Reads `len` bytes at `offset` into a fresh vector.
    fn read_vec_at(&self, len: u64, offset: u64) -> Result<Vec<u8>, crate::Error>;
}

impl<T: ReaderAt + ?Sized> ReaderAtExt for T {
    fn read_at_most_at(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let mut pos = 0;
        while pos < buffer.len() {
            match self.read_at(&mut buffer[pos..], offset + pos as u64)? {
                0 => break,
                n => pos += n,
            }
        }
        Ok(pos)
    }

    fn read_vec_at(&self, len: u64, offset: u64) -> Result<Vec<u8>, crate::Error> {
        let len = usize::try_from(len).map_err(|_| crate::Error::from(crate::ErrorKind::LowMemory))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);
        self.read_exact_at(&mut data, offset)?;
        Ok(data)
    }
}

#[cfg(unix)]
impl ReaderAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReaderAt for std::fs::File {
    /// `seek_read` moves the file cursor, so callers must not rely on the
    /// cursor position across a read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl<T: ReaderAt + ?Sized> ReaderAt for &'_ T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReaderAt + ?Sized> ReaderAt for &'_ mut T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl ReaderAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let skip = self.len().min(usize::try_from(offset).unwrap_or(usize::MAX));
        let data = &self[skip..];
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}

impl ReaderAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<R> ReaderAt for std::io::Cursor<R>
where
    R: AsRef<[u8]>,
{
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let data = self.get_ref().as_ref();
        data.read_at(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_reads_clamp_to_end() {
        let data = b"hello world".to_vec();
        let mut buf = [0u8; 8];
        assert_eq!(data.read_at_most_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(data.read_at(&mut buf, 100).unwrap(), 0);
        assert!(data.read_exact_at(&mut buf, 6).is_err());
    }

    #[test]
    fn test_read_vec_at() {
        let cursor = std::io::Cursor::new(b"0123456789".to_vec());
        assert_eq!(cursor.read_vec_at(3, 4).unwrap(), b"456");
        assert!(cursor.read_vec_at(3, 9).is_err());
    }
}
