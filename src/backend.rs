use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::store::Table;

pub const AUDIT_LOG_FILE: &str = "request-logs.log";

pub trait Backend: Send + Sync + 'static {
    // Ok(None) when the table has never been written
    fn read(&self, table: Table) -> io::Result<Option<Vec<u8>>>;

    fn write(&self, table: Table, contents: &[u8]) -> io::Result<()>;

    fn append_audit(&self, line: &str) -> io::Result<()>;
}

// One JSON document per table in `data_dir`, audit log in `log_dir`
pub struct FileBackend {
    data_dir: PathBuf,
    audit_path: PathBuf,
}

impl FileBackend {
    pub fn open(data_dir: impl AsRef<Path>, log_dir: impl AsRef<Path>) -> io::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&log_dir)?;

        let audit_path = log_dir.join(AUDIT_LOG_FILE);
        OpenOptions::new().create(true).append(true).open(&audit_path)?;

        Ok(Self { data_dir, audit_path })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, table: Table) -> PathBuf {
        self.data_dir.join(table.file_name())
    }
}

impl Backend for FileBackend {
    fn read(&self, table: Table) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(table)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    // Write-then-rename so a reader never sees a half-written table
    fn write(&self, table: Table, contents: &[u8]) -> io::Result<()> {
        let path = self.path(table);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)
    }

    fn append_audit(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    tables: parking_lot::Mutex<std::collections::HashMap<Table, Vec<u8>>>,
    audit: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemoryBackend {
    // Simulates an operator editing the table behind the store's back
    pub fn put(&self, table: Table, contents: &str) {
        self.tables.lock().insert(table, contents.as_bytes().to_vec());
    }

    pub fn contents(&self, table: Table) -> Option<String> {
        self.tables
            .lock()
            .get(&table)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    pub fn audit_lines(&self) -> Vec<String> {
        self.audit.lock().clone()
    }
}

#[cfg(test)]
impl Backend for MemoryBackend {
    fn read(&self, table: Table) -> io::Result<Option<Vec<u8>>> {
        Ok(self.tables.lock().get(&table).cloned())
    }

    fn write(&self, table: Table, contents: &[u8]) -> io::Result<()> {
        self.tables.lock().insert(table, contents.to_vec());
        Ok(())
    }

    fn append_audit(&self, line: &str) -> io::Result<()> {
        self.audit.lock().push(line.to_string());
        Ok(())
    }
}
