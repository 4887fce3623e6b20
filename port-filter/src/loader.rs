use std::{
    io,
    path::{Path, PathBuf},
};

use aya::programs::CgroupSkb;
use aya::programs::cgroup_skb::CgroupSkbLinkId;
use aya::{Ebpf, EbpfLoader};
use port_filter_common::PROGRAM_INGRESS;

use crate::attach::{self, AttachmentHandle};
use crate::config::{self, ConfigMaps, FilterConfig};
use crate::counter::DropCounter;
use crate::error::{AttachError, ConfigError, LoadError, ReadError};
use crate::supervisor::Datapath;

#[cfg(feature = "embedded-ebpf")]
const EMBEDDED_IMAGE: Option<&[u8]> = Some(aya::include_bytes_aligned!(concat!(
    env!("OUT_DIR"),
    "/port-filter"
)));
#[cfg(not(feature = "embedded-ebpf"))]
const EMBEDDED_IMAGE: Option<&[u8]> = None;

/// Where the compiled cgroup_skb object comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgramImage {
    Embedded,
    File(PathBuf),
}

impl ProgramImage {
    /// An explicit path wins over the image compiled into the binary.
    pub fn select(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::File(path),
            None => Self::Embedded,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub image: Option<PathBuf>,
    pub pin_counter: Option<PathBuf>,
}

/// Lifts RLIMIT_MEMLOCK so map and program allocations are not refused on
/// kernels without memcg-based accounting.
pub fn remove_memlock_limit() -> Result<(), LoadError> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        return Err(LoadError::Memlock(io::Error::last_os_error()));
    }
    Ok(())
}

/// Program and maps as loaded into the kernel, not yet attached anywhere.
pub struct LoadedFilter {
    bpf: Ebpf,
    config: ConfigMaps,
    counter: DropCounter,
}

/// Removes the memlock limit, loads the object and its maps, and runs the
/// ingress program through the verifier.
pub fn load(opts: &LoadOptions) -> Result<LoadedFilter, LoadError> {
    remove_memlock_limit()?;

    let mut loader = EbpfLoader::new();
    let mut bpf = match ProgramImage::select(opts.image.clone()) {
        ProgramImage::File(path) => loader.load_file(&path),
        ProgramImage::Embedded => loader.load(EMBEDDED_IMAGE.ok_or(LoadError::NoImage)?),
    }
    .map_err(LoadError::Object)?;

    let program: &mut CgroupSkb = bpf
        .program_mut(PROGRAM_INGRESS)
        .ok_or(LoadError::MissingProgram(PROGRAM_INGRESS))?
        .try_into()
        .map_err(|source| LoadError::Program {
            name: PROGRAM_INGRESS,
            source,
        })?;
    program.load().map_err(|source| LoadError::Program {
        name: PROGRAM_INGRESS,
        source,
    })?;

    let config = ConfigMaps::take_from(&mut bpf)?;
    let counter = DropCounter::take_from(&mut bpf, opts.pin_counter.as_deref())?;
    log::info!("Loaded program {PROGRAM_INGRESS}");

    Ok(LoadedFilter {
        bpf,
        config,
        counter,
    })
}

impl Datapath for LoadedFilter {
    type Link = CgroupSkbLinkId;

    fn publish(&mut self, port: u32, process_name: &str) -> Result<FilterConfig, ConfigError> {
        config::publish(&mut self.config, port, process_name)
    }

    fn attach(&mut self, cgroup: &Path) -> Result<AttachmentHandle<Self::Link>, AttachError> {
        attach::attach_ingress(&mut self.bpf, cgroup)
    }

    fn detach(&mut self, handle: AttachmentHandle<Self::Link>) -> Result<(), AttachError> {
        attach::detach_ingress(&mut self.bpf, handle)
    }

    fn sample(&self) -> Result<u64, ReadError> {
        self.counter.sample()
    }

    fn close(self) {
        let Self {
            bpf,
            config,
            counter,
        } = self;
        counter.close();
        drop(config);
        drop(bpf);
        log::debug!("closed program and map handles");
    }
}
