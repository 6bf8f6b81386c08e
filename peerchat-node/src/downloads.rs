//! Received files: written under one directory without ever overwriting an existing file.

use std::io;
use std::path::{Path, PathBuf};

use peerchat_core::protocol::now_millis;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const MAX_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct Downloads {
    dir: PathBuf,
}

impl Downloads {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `bytes` as `name`; on collision the first free `stem_N.ext` is used.
    /// Only the final path component of `name` is honored.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let name = file_name(name);
        for n in 0..MAX_ATTEMPTS {
            let path = self.dir.join(numbered(&name, n));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {}", name),
        ))
    }
}

fn file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        format!("file_{}", now_millis())
    } else {
        base.to_string()
    }
}

fn numbered(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], n, &name[dot..]),
        _ => format!("{}_{}", name, n),
    }
}
