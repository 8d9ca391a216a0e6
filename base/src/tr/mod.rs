mod data;
mod reader;
mod writer;

use std::result::Result as StdResult;
use std::str::FromStr;

use structopt::StructOpt;

use crate::defs::{Error, ErrorKind::*, Result};
pub use data::*;
pub use reader::*;
pub use writer::*;

pub const MAGIC: u32 = 0x7E3C_0A51;
pub const VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Gzip = 1,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            _ => Err(Error::new(
                MalformedData,
                "unknown .tr compression (can be 'none' or 'gzip')".to_string(),
            )),
        }
    }
}

pub const DEFAULT_COMPRESSION: &str = "gzip";
pub const DEFAULT_GZIP_LEVEL: &str = "6";

fn validate_gzip_level(value: String) -> StdResult<(), String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|_| "must be a positive integer".to_string())?;
    if parsed > 9 {
        return Err("unsupported gzip level (can be from 0 to 9)".to_string());
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, StructOpt)]
pub struct WriterParams {
    #[structopt(
        name = "tr-compression",
        help = "Type of compression for output .tr files",
        default_value = DEFAULT_COMPRESSION,
        long
    )]
    pub compression: Compression,

    #[structopt(
        name = "tr-gzip-level",
        help = "Level of gzip-compression for output .tr files",
        default_value = DEFAULT_GZIP_LEVEL,
        long,
        validator = validate_gzip_level
    )]
    pub gzip_level: u32,
}

impl Default for WriterParams {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
            gzip_level: 6,
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn new_data_costs() -> DataCosts {
        DataCosts {
            num_faces: 2,
            num_views: 3,
            faces: vec![
                FaceCosts {
                    views: vec![0, 2],
                    costs: vec![0.25, 1.0 / 3.0],
                },
                FaceCosts::default(),
            ],
        }
    }

    #[test]
    fn test_data_costs_survive_both_compressions() {
        for compression in [Compression::None, Compression::Gzip] {
            let params = WriterParams {
                compression,
                gzip_level: 9,
            };
            let mut buf = Vec::new();
            write_message(&new_data_costs(), &mut buf, &params).unwrap();
            let msg: DataCosts = read_message(Cursor::new(buf)).unwrap();
            assert_eq!(msg, new_data_costs());
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        let err = read_message::<Labeling, _>(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "bad .tr magic '0xDEADBEEF'");
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes());
        let err = read_message::<Labeling, _>(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind, UnsupportedFeature);
        assert_eq!(&err.description, "unsupported .tr version '7'");
    }

    #[test]
    fn test_unknown_compression() {
        assert!(Compression::from_str("zstd").is_err());
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&5i32.to_le_bytes());
        let err = read_message::<Labeling, _>(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "unknown compression '5'");
    }

    #[test]
    fn test_truncated_header() {
        let err = read_message::<Labeling, _>(Cursor::new(vec![1u8, 2]))
            .unwrap_err();
        assert_eq!(err.kind, IoError);
        assert_eq!(&err.description, "failed to read .tr magic");
    }
}
