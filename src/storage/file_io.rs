//! File I/O utilities with atomic writes
//!
//! JSON documents and JSON-lines logs are both replaced through a temp file
//! plus rename, so a crash leaves either the old or the new content.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AuditError;

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> Result<T, AuditError>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    read_json_required(path)
}

/// Read JSON from a file, returning an error if file doesn't exist
pub fn read_json_required<T, P>(path: P) -> Result<T, AuditError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let file = File::open(path)
        .map_err(|e| AuditError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| AuditError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
pub fn write_json_atomic<T, P>(path: P, data: &T) -> Result<(), AuditError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    replace_atomic(path, |writer| {
        serde_json::to_writer_pretty(writer, data)
            .map_err(|e| AuditError::Storage(format!("Failed to serialize data: {}", e)))
    })
}

/// Rewrite a JSON-lines file atomically with the given records
pub fn write_lines_atomic<T, P>(path: P, records: &[T]) -> Result<(), AuditError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    replace_atomic(path, |writer| {
        for record in records {
            serde_json::to_writer(&mut *writer, record)
                .map_err(|e| AuditError::Storage(format!("Failed to serialize record: {}", e)))?;
            writer
                .write_all(b"\n")
                .map_err(|e| AuditError::Storage(format!("Failed to write record: {}", e)))?;
        }
        Ok(())
    })
}

/// Append records to a JSON-lines file and sync once at the end
pub fn append_lines<T, P>(path: P, records: &[T]) -> Result<(), AuditError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if records.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;

    // Serialize everything first so a bad record never leaves a partial batch
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)
            .map_err(|e| AuditError::Json(format!("Failed to serialize audit record: {}", e)))?;
        buf.push(b'\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AuditError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    file.write_all(&buf)
        .map_err(|e| AuditError::Io(format!("Failed to append to {}: {}", path.display(), e)))?;
    file.sync_data()
        .map_err(|e| AuditError::Io(format!("Failed to sync {}: {}", path.display(), e)))?;

    Ok(())
}

/// Read every record of a JSON-lines file, skipping blank lines
pub fn read_lines<T, P>(path: P) -> Result<Vec<T>, AuditError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .map_err(|e| AuditError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut records = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            AuditError::Io(format!("Failed to read {} line {}: {}", path.display(), line_num + 1, e))
        })?;

        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str(&line).map_err(|e| {
            AuditError::Json(format!(
                "Failed to parse {} at line {}: {}",
                path.display(),
                line_num + 1,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

fn ensure_parent(path: &Path) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AuditError::Storage(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn replace_atomic<F>(path: &Path, write: F) -> Result<(), AuditError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), AuditError>,
{
    ensure_parent(path)?;

    // Temp file in the same directory so the rename stays atomic
    let temp_path = temp_path_for(path);

    let file = File::create(&temp_path)
        .map_err(|e| AuditError::Storage(format!("Failed to create temp file: {}", e)))?;

    let mut writer = BufWriter::new(file);
    if let Err(e) = write(&mut writer) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    writer
        .flush()
        .map_err(|e| AuditError::Storage(format!("Failed to flush data: {}", e)))?;

    writer
        .get_ref()
        .sync_all()
        .map_err(|e| AuditError::Storage(format!("Failed to sync data: {}", e)))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        AuditError::Storage(format!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn data(value: i32) -> TestData {
        TestData {
            name: "test".to_string(),
            value,
        }
    }

    #[test]
    fn test_read_nonexistent_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let loaded: TestData = read_json(&path).unwrap();
        assert_eq!(loaded, TestData::default());
        assert!(read_json_required::<TestData, _>(&path).is_err());
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.json");

        write_json_atomic(&path, &data(42)).unwrap();

        let loaded: TestData = read_json(&path).unwrap();
        assert_eq!(loaded, data(42));
        assert!(!temp_dir.path().join("nested").join("test.json.tmp").exists());
    }

    #[test]
    fn test_append_and_read_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit").join("audit.log");

        append_lines(&path, &[data(1), data(2)]).unwrap();
        append_lines(&path, &[data(3)]).unwrap();
        append_lines::<TestData, _>(&path, &[]).unwrap();

        let loaded: Vec<TestData> = read_lines(&path).unwrap();
        assert_eq!(loaded.iter().map(|d| d.value).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rewrite_lines_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit.log");

        append_lines(&path, &[data(1), data(2)]).unwrap();
        write_lines_atomic(&path, &[data(9)]).unwrap();

        let loaded: Vec<TestData> = read_lines(&path).unwrap();
        assert_eq!(loaded, vec![data(9)]);
        assert!(!temp_dir.path().join("audit.log.tmp").exists());
    }

    #[test]
    fn test_read_lines_reports_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit.log");
        fs::write(&path, "{\"name\":\"a\",\"value\":1}\n\nnot json\n").unwrap();

        let err = read_lines::<TestData, _>(&path).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }
}
