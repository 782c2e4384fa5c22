//! Archive output sink: a file or stdout, optionally gzip-compressed.

use anyhow::Context;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};

enum Target {
    Stdout(Stdout),
    File(File),
}

impl Write for Target {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Target::Stdout(out) => out.write(buf),
            Target::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Target::Stdout(out) => out.flush(),
            Target::File(file) => file.flush(),
        }
    }
}

enum Encoding {
    Plain(BufWriter<Target>),
    Gzip(GzEncoder<BufWriter<Target>>),
}

/// Where the archive bytes go.
pub struct OutputSink {
    encoding: Encoding,
    path: Option<PathBuf>,
}

impl OutputSink {
    /// Open `out` (`-` for stdout), compressing at `gzip` level if set.
    pub fn open(out: &str, gzip: Option<u32>) -> anyhow::Result<Self> {
        let (target, path) = if out == "-" {
            (Target::Stdout(io::stdout()), None)
        } else {
            let path = PathBuf::from(out);
            let file = File::create(&path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            (Target::File(file), Some(path))
        };

        let writer = BufWriter::with_capacity(1 << 20, target);
        let encoding = match gzip {
            Some(level) => Encoding::Gzip(GzEncoder::new(writer, Compression::new(level))),
            None => Encoding::Plain(writer),
        };
        Ok(OutputSink { encoding, path })
    }

    /// The output file, or `None` for stdout
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush everything, writing the gzip trailer if compressing.
    pub fn finish(self) -> io::Result<()> {
        let mut writer = match self.encoding {
            Encoding::Plain(writer) => writer,
            Encoding::Gzip(encoder) => encoder.finish()?,
        };
        writer.flush()?;
        if let Target::File(file) = writer.get_ref() {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoding {
            Encoding::Plain(writer) => writer.write(buf),
            Encoding::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoding {
            Encoding::Plain(writer) => writer.flush(),
            Encoding::Gzip(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_plain_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.tar");

        let mut sink = OutputSink::open(path.to_str().unwrap(), None).unwrap();
        assert_eq!(sink.path(), Some(path.as_path()));
        sink.write_all(b"archive bytes").unwrap();
        sink.finish().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_gzip_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.tar.gz");

        let mut sink = OutputSink::open(path.to_str().unwrap(), Some(9)).unwrap();
        sink.write_all(&[0u8; 4096]).unwrap();
        sink.finish().unwrap();

        let compressed = fs::read(&path).unwrap();
        assert!(compressed.len() < 4096);
        let mut decoded = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, vec![0u8; 4096]);
    }

    #[test]
    fn test_stdout_has_no_path() {
        let sink = OutputSink::open("-", None).unwrap();
        assert!(sink.path().is_none());
    }

    #[test]
    fn test_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.tar");
        assert!(OutputSink::open(path.to_str().unwrap(), None).is_err());
    }
}
