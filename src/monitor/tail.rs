//! Incremental reading of a job's output files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Tracks a read offset into one output file and returns only the growth
/// since the previous read.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    offset: u64,
}

impl FileTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Reads content appended since the last call. A file that does not
    /// exist yet yields nothing; a file shorter than the previous offset
    /// (truncated by a relaunch) is re-read from the start.
    pub fn read_new(&mut self) -> std::io::Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }

        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(String::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.offset = len;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Full current contents, regardless of the tail offset. Post-mortem
    /// evaluation uses this so a signature the live scans skipped past is
    /// still seen once.
    pub fn read_all(&self) -> std::io::Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut tail = FileTail::new(tmp.path().join("solver.out"));
        assert_eq!(tail.read_new().unwrap(), "");
    }

    #[test]
    fn reads_only_the_growth() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("solver.out");
        let mut tail = FileTail::new(&path);

        fs::write(&path, "step 1\n").unwrap();
        assert_eq!(tail.read_new().unwrap(), "step 1\n");
        assert_eq!(tail.read_new().unwrap(), "");

        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("step 2\n");
        fs::write(&path, contents).unwrap();
        assert_eq!(tail.read_new().unwrap(), "step 2\n");
    }

    #[test]
    fn truncated_file_is_reread_from_the_start() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("solver.out");
        let mut tail = FileTail::new(&path);

        fs::write(&path, "a long first run of output\n").unwrap();
        tail.read_new().unwrap();

        // A relaunch truncates and starts over with shorter content.
        fs::write(&path, "fresh\n").unwrap();
        assert_eq!(tail.read_new().unwrap(), "fresh\n");
    }

    #[test]
    fn read_all_ignores_the_offset() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("solver.out");
        let mut tail = FileTail::new(&path);

        fs::write(&path, "first\nsecond\n").unwrap();
        tail.read_new().unwrap();
        assert_eq!(tail.read_all().unwrap(), "first\nsecond\n");
    }
}
