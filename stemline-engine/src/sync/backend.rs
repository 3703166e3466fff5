//! Pluggable transport backend (spec §4.8): "Each backend is a single
//! operation `send(local_path, remote_path, opts) -> ok|err`."

use crate::config::SyncConfig;
use std::path::Path;
use std::process::{Command, Stdio};
use stemline_common::{Error, Result};

pub struct SendOpts<'a> {
    pub bandwidth_cap_kbps: Option<u64>,
    pub compression: bool,
    pub dry_run: bool,
    pub s3_bucket: Option<&'a str>,
    pub s3_prefix: Option<&'a str>,
    pub s3_region: Option<&'a str>,
    pub s3_endpoint: Option<&'a str>,
    pub scp_host: Option<&'a str>,
    pub scp_user: Option<&'a str>,
    pub scp_key: Option<&'a str>,
}

impl<'a> SendOpts<'a> {
    pub fn from_config(config: &'a SyncConfig) -> Self {
        Self {
            bandwidth_cap_kbps: config.bandwidth_cap_kbps,
            compression: config.compression,
            dry_run: config.dry_run,
            s3_bucket: config.s3_bucket.as_deref(),
            s3_prefix: config.s3_prefix.as_deref(),
            s3_region: config.s3_region.as_deref(),
            s3_endpoint: config.s3_endpoint.as_deref(),
            scp_host: config.scp_host.as_deref(),
            scp_user: config.scp_user.as_deref(),
            scp_key: config.scp_key.as_deref(),
        }
    }
}

/// Transfer one local file to a resolved remote destination. Errors are
/// always `SyncTransient` (spec §7): a backend failure defers the whole
/// manifest to the next poll rather than failing it outright.
pub fn send(local_path: &Path, remote_dest: &str, opts: &SendOpts) -> Result<()> {
    if opts.dry_run {
        return Ok(());
    }
    local_backend_if_plain_path(local_path, remote_dest)
        .or_else(|| rsync_send(local_path, remote_dest, opts))
        .unwrap_or_else(|| {
            Err(Error::SyncTransient {
                path: local_path.to_path_buf(),
                reason: "no backend matched destination".to_string(),
            })
        })
}

/// `local` method: `remote_dest` is a plain filesystem path, copied directly.
fn local_backend_if_plain_path(local_path: &Path, remote_dest: &str) -> Option<Result<()>> {
    if remote_dest.contains("://") || remote_dest.contains('@') {
        return None;
    }
    Some(copy_local(local_path, Path::new(remote_dest)))
}

fn copy_local(local_path: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::SyncTransient {
            path: local_path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    std::fs::copy(local_path, dest).map_err(|e| Error::SyncTransient {
        path: local_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// `rsync`/`scp` method: shell out to the `rsync` binary, which both
/// methods use for a plain host:path destination.
fn rsync_send(local_path: &Path, remote_dest: &str, opts: &SendOpts) -> Option<Result<()>> {
    let mut cmd = Command::new("rsync");
    cmd.arg("-a");
    if opts.compression {
        cmd.arg("-z");
    }
    if let Some(cap) = opts.bandwidth_cap_kbps {
        cmd.arg(format!("--bwlimit={cap}"));
    }
    cmd.arg(local_path).arg(remote_dest).stdout(Stdio::null()).stderr(Stdio::piped());

    let output = match cmd.output() {
        Ok(o) => o,
        Err(e) => return Some(Err(Error::SyncTransient { path: local_path.to_path_buf(), reason: e.to_string() })),
    };
    if output.status.success() {
        Some(Ok(()))
    } else {
        Some(Err(Error::SyncTransient {
            path: local_path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }
}
