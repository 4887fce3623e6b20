use std::path::PathBuf;

use aya::maps::MapError;
use aya::programs::ProgramError;
use aya::{EbpfError, pin::PinError};

/// Writing or reading back the filter configuration maps failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to update map `{map}`: {source}")]
    Update {
        map: &'static str,
        #[source]
        source: MapError,
    },
    #[error("failed to read map `{map}`: {source}")]
    Lookup {
        map: &'static str,
        #[source]
        source: MapError,
    },
}

/// The cgroup v2 hierarchy could not be located.
#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    #[error("cgroup2 not mounted")]
    NotMounted,
    #[error("failed to read mount table `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The kernel refused to bind (or unbind) the program to the cgroup.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("program `{0}` not found in the loaded object")]
    MissingProgram(&'static str),
    #[error("program `{name}` has the wrong type: {source}")]
    ProgramType {
        name: &'static str,
        #[source]
        source: ProgramError,
    },
    #[error("failed to open cgroup `{path}`: {source}")]
    OpenCgroup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to attach to cgroup `{path}`: {source}")]
    Attach {
        path: PathBuf,
        #[source]
        source: ProgramError,
    },
    #[error("failed to detach from cgroup `{path}`: {source}")]
    Detach {
        path: PathBuf,
        #[source]
        source: ProgramError,
    },
}

/// Bringing the program and its maps into the kernel failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to remove memlock limit: {0}")]
    Memlock(#[source] std::io::Error),
    #[error("no program image: pass --object or build with the `embedded-ebpf` feature")]
    NoImage,
    #[error("failed to load eBPF object: {0}")]
    Object(#[source] EbpfError),
    #[error("program `{0}` not found in the loaded object")]
    MissingProgram(&'static str),
    #[error("program `{name}` rejected by the kernel: {source}")]
    Program {
        name: &'static str,
        #[source]
        source: ProgramError,
    },
    #[error("map `{0}` not found in the loaded object")]
    MissingMap(&'static str),
    #[error("map `{map}` has an unexpected type: {source}")]
    MapType {
        map: &'static str,
        #[source]
        source: MapError,
    },
    #[error("failed to prepare pin path `{path}`: {source}")]
    PinPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to pin map `{map}` at `{path}`: {source}")]
    Pin {
        map: &'static str,
        path: PathBuf,
        #[source]
        source: PinError,
    },
}

/// A single drop counter lookup failed. Never fatal to the supervision loop.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed to read drop counter: {0}")]
    Lookup(#[source] MapError),
    #[error("failed to open pinned drop counter `{path}`: {source}")]
    Pinned {
        path: PathBuf,
        #[source]
        source: MapError,
    },
}

/// A startup stage failed; nothing is attached when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("resolving cgroup path: {0}")]
    Cgroup(#[from] CgroupError),
    #[error("loading filter: {0}")]
    Load(#[from] LoadError),
    #[error("publishing configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("attaching filter: {0}")]
    Attach(#[from] AttachError),
}
