use std::io::Write;

use flate2::write::GzEncoder;
use prost::Message;

use crate::defs::{Error, ErrorKind::*, IntoResult, Result};
use crate::tr::{Compression, WriterParams, MAGIC, VERSION};

pub fn write_message<M, W>(
    message: &M,
    mut writer: W,
    params: &WriterParams,
) -> Result<()>
where
    M: Message,
    W: Write,
{
    writer
        .write_all(&MAGIC.to_le_bytes())
        .res(|| "failed to write .tr magic".to_string())?;
    writer
        .write_all(&VERSION.to_le_bytes())
        .res(|| "failed to write .tr version".to_string())?;
    writer
        .write_all(&(params.compression as i32).to_le_bytes())
        .res(|| "failed to write .tr compression".to_string())?;

    let mut buf = Vec::with_capacity(message.encoded_len());
    message.encode(&mut buf).map_err(|e| {
        Error::with_source(
            InconsistentState,
            "failed to encode .tr message".to_string(),
            e,
        )
    })?;

    match params.compression {
        Compression::None => writer
            .write_all(&buf)
            .res(|| "failed to write .tr message".to_string()),
        Compression::Gzip => {
            let level = flate2::Compression::new(params.gzip_level);
            let mut encoder = GzEncoder::new(writer, level);
            encoder
                .write_all(&buf)
                .res(|| "failed to write .tr message".to_string())?;
            encoder
                .try_finish()
                .res(|| "failed to finish encoding".to_string())
        }
    }
}
