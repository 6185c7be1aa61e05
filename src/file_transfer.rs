//! File transfer between the client file system and the engine's.
//!
//! Files move as chunked byte streams. Server paths use `/` separators
//! whatever the client platform.

use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::server::{self, Server};
use crate::transport::call::{Call, FileCall};
use crate::transport::TransferOptions;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Upload `local` to `server_path`, relative to the engine temporary
/// directory when `use_tmp_dir` is set. Returns the engine-side path.
pub fn upload_file(local: &Path, server_path: &str, use_tmp_dir: bool, server: Option<&Server>) -> Result<String, DpfError> {
    upload_file_with(local, server_path, use_tmp_dir, server, &mut TransferOptions::new())
}

pub fn upload_file_with(
    local: &Path,
    server_path: &str,
    use_tmp_dir: bool,
    server: Option<&Server>,
    opts: &mut TransferOptions<'_>,
) -> Result<String, DpfError> {
    let server = server::resolve(server)?;
    let bytes = fs::read(local)?;
    debug!("upload {} ({} bytes) to {server_path}", local.display(), bytes.len());
    server
        .upload(
            Call::File(FileCall::Upload {
                server_path: server_path.to_string(),
                use_tmp_dir,
            }),
            &Payload::Bytes(bytes),
            opts,
        )?
        .into_text()
}

/// Download `server_path` into `local`, creating parent directories.
pub fn download_file(server_path: &str, local: &Path, server: Option<&Server>) -> Result<(), DpfError> {
    download_file_with(server_path, local, server, &mut TransferOptions::new())
}

pub fn download_file_with(
    server_path: &str,
    local: &Path,
    server: Option<&Server>,
    opts: &mut TransferOptions<'_>,
) -> Result<(), DpfError> {
    let server = server::resolve(server)?;
    let bytes = server
        .download(
            Call::File(FileCall::Download {
                server_path: server_path.to_string(),
            }),
            opts,
        )?
        .into_bytes()?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!("download {server_path} ({} bytes) to {}", bytes.len(), local.display());
    fs::write(local, bytes)?;
    Ok(())
}

/// Upload every file below `local_dir` under `server_dir`, keeping the
/// relative layout. Returns the engine-side paths.
pub fn upload_dir(local_dir: &Path, server_dir: &str, use_tmp_dir: bool, server: Option<&Server>) -> Result<Vec<String>, DpfError> {
    let server = server::resolve(server)?;
    let mut out = Vec::new();
    for rel in walk(local_dir)? {
        let remote = join_server_path(server_dir, &rel);
        out.push(upload_file(&local_dir.join(&rel), &remote, use_tmp_dir, Some(&server))?);
    }
    Ok(out)
}

/// Download the tree below `server_dir` into `local_dir`.
pub fn download_dir(server_dir: &str, local_dir: &Path, server: Option<&Server>) -> Result<Vec<PathBuf>, DpfError> {
    let server = server::resolve(server)?;
    let files = list_server_dir(server_dir, Some(&server))?;
    let mut out = Vec::with_capacity(files.len());
    for rel in files {
        let local = rel.split('/').fold(local_dir.to_path_buf(), |p, part| p.join(part));
        download_file(&join_server_path(server_dir, &rel), &local, Some(&server))?;
        out.push(local);
    }
    Ok(out)
}

/// Files below `server_dir`, relative to it.
pub fn list_server_dir(server_dir: &str, server: Option<&Server>) -> Result<Vec<String>, DpfError> {
    let server = server::resolve(server)?;
    server
        .call(Call::File(FileCall::List {
            server_path: server_dir.to_string(),
        }))?
        .into_strings()
}

pub fn server_tmp_dir(server: Option<&Server>) -> Result<String, DpfError> {
    let server = server::resolve(server)?;
    server.call(Call::File(FileCall::TmpDir))?.into_text()
}

fn join_server_path(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{rel}", dir.trim_end_matches('/'))
    }
}

/// Relative `/`-separated paths of the files below `root`, sorted.
fn walk(root: &Path) -> Result<Vec<String>, DpfError> {
    let mut out = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(rel) = stack.pop() {
        for entry in fs::read_dir(root.join(&rel))? {
            let entry = entry?;
            let rel = rel.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                stack.push(rel);
            } else {
                let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
                out.push(parts.join("/"));
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_paths_join_with_slash() {
        assert_eq!(join_server_path("a/b/", "c.txt"), "a/b/c.txt");
        assert_eq!(join_server_path("", "c.txt"), "c.txt");
    }
}
