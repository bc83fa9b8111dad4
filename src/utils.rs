//! Utility functions for working with files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

//-----------------------------------------------------------------------------

/// Returns `true` if the file exists.
pub fn file_exists<P: AsRef<Path>>(filename: P) -> bool {
    fs::metadata(filename).is_ok()
}

/// Returns the modification time of the file, or [`None`] if it cannot be determined.
///
/// Symbolic links are followed.
pub fn modification_time<P: AsRef<Path>>(filename: P) -> Option<SystemTime> {
    fs::metadata(filename).and_then(|m| m.modified()).ok()
}

/// Creates an empty file or updates the modification time of an existing file.
pub fn touch<P: AsRef<Path>>(filename: P) -> Result<(), String> {
    let file = OpenOptions::new().create(true).append(true).open(&filename).map_err(|x| {
        format!("Cannot touch {}: {}", filename.as_ref().display(), x)
    })?;
    file.set_modified(SystemTime::now()).map_err(|x| x.to_string())
}

//-----------------------------------------------------------------------------

/// Returns `true` if the file appears to be gzip-compressed.
pub fn is_gzipped<P: AsRef<Path>>(filename: P) -> bool {
    let Ok(file) = File::open(filename) else {
        return false;
    };
    let mut reader = BufReader::new(file);
    let mut magic = [0; 2];
    let len = reader.read(&mut magic).ok();
    len == Some(2) && magic == [0x1F, 0x8B]
}

/// Returns a buffered reader for the file, which may be gzip-compressed.
pub fn open_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn BufRead>, String> {
    let file = File::open(&filename).map_err(|x| {
        format!("Cannot open {}: {}", filename.as_ref().display(), x)
    })?;
    let inner = BufReader::new(file);
    if is_gzipped(&filename) {
        let inner = MultiGzDecoder::new(inner);
        Ok(Box::new(BufReader::new(inner)))
    } else {
        Ok(Box::new(inner))
    }
}

/// Returns a buffered writer for the file.
///
/// The output is gzip-compressed if the file name ends with `.gz`.
pub fn create_file<P: AsRef<Path>>(filename: P) -> Result<Box<dyn Write>, String> {
    let file = File::create(&filename).map_err(|x| {
        format!("Cannot create {}: {}", filename.as_ref().display(), x)
    })?;
    let inner = BufWriter::new(file);
    if is_gz_name(&filename) {
        Ok(Box::new(GzEncoder::new(inner, Compression::default())))
    } else {
        Ok(Box::new(inner))
    }
}

fn is_gz_name<P: AsRef<Path>>(filename: P) -> bool {
    filename.as_ref().extension().map(|x| x == "gz").unwrap_or(false)
}

/// Reads all lines of the file, which may be gzip-compressed.
pub fn read_lines<P: AsRef<Path>>(filename: P) -> Result<Vec<String>, String> {
    let reader = open_file(&filename)?;
    let mut result = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|x| format!("{}: {}", filename.as_ref().display(), x))?;
        result.push(line);
    }
    Ok(result)
}

//-----------------------------------------------------------------------------

// File name manipulation.

/// Removes the given suffix from the file name.
///
/// Returns an error if the name does not end with the suffix.
pub fn snip(filename: &str, suffix: &str) -> Result<String, String> {
    filename.strip_suffix(suffix).map(String::from).ok_or_else(|| {
        format!("{} does not end with {}", filename, suffix)
    })
}

/// Returns the last component of the path as a string.
pub fn basename<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().file_name().map(|x| x.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Returns the path as a string, converting non-UTF-8 parts lossily.
pub fn path_str<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().into_owned()
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn suffix_removal() {
        assert_eq!(snip("sample.bowtie.bam", ".bam"), Ok(String::from("sample.bowtie")));
        assert!(snip("sample.bowtie.bam", ".sam").is_err(), "Removed a missing suffix");
        assert_eq!(basename("tophat.dir/sample.tophat.bam"), "sample.tophat.bam");
    }

    #[test]
    fn gzip_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("table.tsv");
        let compressed = dir.path().join("table.tsv.gz");
        for filename in [&plain, &compressed] {
            let mut output = create_file(filename).unwrap();
            output.write_all(b"track\tnreads\nsample\t42\n").unwrap();
            drop(output);
        }

        assert!(!is_gzipped(&plain), "Plain file detected as gzipped");
        assert!(is_gzipped(&compressed), "Compressed file not detected as gzipped");
        for filename in [&plain, &compressed] {
            let lines = read_lines(filename);
            assert!(lines.is_ok(), "Failed to read {}: {}", filename.display(), lines.unwrap_err());
            assert_eq!(lines.unwrap(), vec!["track\tnreads", "sample\t42"], "Wrong lines in {}", filename.display());
        }
    }

    #[test]
    fn touch_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("sentinel.load");
        assert!(!file_exists(&filename));
        let result = touch(&filename);
        assert!(result.is_ok(), "Failed to touch: {}", result.unwrap_err());
        assert!(file_exists(&filename));
        assert!(modification_time(&filename).is_some(), "No modification time");
    }
}

//-----------------------------------------------------------------------------
