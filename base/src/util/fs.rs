use std::fs::{read, File};
use std::path::Path;

use crate::defs::{IntoResult, Result};

fn describe(action: &str, path: &Path) -> String {
    if let Some(path) = path.to_str() {
        format!("failed to {} file '{}'", action, path)
    } else {
        format!("failed to {} file", action)
    }
}

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::open(path).res(|| describe("open", path))
}

pub fn create_file<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::create(path).res(|| describe("create", path))
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    read(path).res(|| describe("read", path))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::defs::ErrorKind;

    #[test]
    fn test_open_missing_file() {
        let err = open_file("/nonexistent/dir/labeling.tr").unwrap_err();
        assert_eq!(err.kind, ErrorKind::IoError);
        assert_eq!(
            &err.description,
            "failed to open file '/nonexistent/dir/labeling.tr'"
        );
    }
}
