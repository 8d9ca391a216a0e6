use std::io::Read;

use prost::Message;

use crate::defs::{Error, ErrorKind::*, IntoResult, Result};
use crate::tr::{Compression, MAGIC, VERSION};

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0; 4];
    reader
        .read_exact(&mut buf)
        .res(|| format!("failed to read .tr {}", what))?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_message<M, R>(mut reader: R) -> Result<M>
where
    M: Message + Default,
    R: Read,
{
    let val = read_u32(&mut reader, "magic")?;
    if val != MAGIC {
        return Err(Error::new(
            MalformedData,
            format!("bad .tr magic '{:#X}'", val),
        ));
    }

    let val = read_u32(&mut reader, "version")?;
    if val != VERSION {
        return Err(Error::new(
            UnsupportedFeature,
            format!("unsupported .tr version '{}'", val),
        ));
    }

    let val = read_u32(&mut reader, "compression")? as i32;

    const COMPRESSION_NONE: i32 = Compression::None as i32;
    const COMPRESSION_GZIP: i32 = Compression::Gzip as i32;

    let mut buf = Vec::new();
    let res = match val {
        COMPRESSION_NONE => reader.read_to_end(&mut buf),
        COMPRESSION_GZIP => {
            flate2::read::GzDecoder::new(reader).read_to_end(&mut buf)
        }
        _ => {
            return Err(Error::new(
                MalformedData,
                format!("unknown compression '{}'", val),
            ));
        }
    };
    res.res(|| "failed to read .tr message".to_string())?;

    M::decode(buf.as_slice()).map_err(|e| {
        Error::with_source(
            MalformedData,
            "failed to decode .tr message".to_string(),
            e,
        )
    })
}
