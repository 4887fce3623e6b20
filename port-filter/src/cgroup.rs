use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::error::CgroupError;

pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";
const CGROUP2_FS_TYPE: &str = "cgroup2";

/// Returns the mount point of the first `cgroup2` entry in the mount table at `path`.
///
/// Lines are `source mount_point fs_type options dump pass`. When several
/// cgroup2 hierarchies are mounted the first one listed wins.
pub fn resolve_cgroup_path(path: impl AsRef<Path>) -> Result<PathBuf, CgroupError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CgroupError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    resolve_from_reader(BufReader::new(file), path)
}

fn resolve_from_reader<R: BufRead>(reader: R, origin: &Path) -> Result<PathBuf, CgroupError> {
    for line in reader.lines() {
        let line = line.map_err(|source| CgroupError::Read {
            path: origin.to_path_buf(),
            source,
        })?;
        let mut fields = line.split_whitespace();
        let (Some(_source), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if fs_type == CGROUP2_FS_TYPE {
            log::debug!("found cgroup2 mount at {mount_point}");
            return Ok(PathBuf::from(mount_point));
        }
    }
    Err(CgroupError::NotMounted)
}
