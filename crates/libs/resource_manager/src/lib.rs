use std::path::{Path, PathBuf};
use std::{fs, io};

use thiserror::Error as ThisError;

pub const SPV_SEARCH_PATHS: [&str; 2] = ["", "./spv"];

const SPIRV_MAGIC: u32 = 0x0723_0203;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Couldn't find spv file {} in {searched:?}", .path.display())]
    NotFound { path: PathBuf, searched: Vec<PathBuf> },
    #[error("Failed to read spv file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{} is not SPIR-V ({len} bytes)", .path.display())]
    InvalidSpirv { path: PathBuf, len: usize },
}

/// Reads the first `path` found under `search_paths`, in order.
pub fn load_spv<P, S>(path: P, search_paths: &[S]) -> Result<Vec<u8>>
where
    P: AsRef<Path>,
    S: AsRef<Path>,
{
    let path = path.as_ref();
    let mut searched = Vec::with_capacity(search_paths.len());

    for pre in search_paths {
        let search = pre.as_ref().join(path);
        match fs::read(&search) {
            Ok(bytes) => {
                check_spirv(&search, &bytes)?;
                log::debug!("Loaded {} ({} bytes)", search.display(), bytes.len());
                return Ok(bytes);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => searched.push(search),
            Err(source) => return Err(Error::Io { path: search, source }),
        }
    }

    Err(Error::NotFound {
        path: path.to_owned(),
        searched,
    })
}

fn check_spirv(path: &Path, bytes: &[u8]) -> Result<()> {
    let magic = bytes
        .get(..4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]));

    if bytes.len() % 4 != 0 || !matches!(magic, Some(m) if m == SPIRV_MAGIC || m.swap_bytes() == SPIRV_MAGIC)
    {
        return Err(Error::InvalidSpirv {
            path: path.to_owned(),
            len: bytes.len(),
        });
    }

    Ok(())
}
