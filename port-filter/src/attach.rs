use std::{
    fs::File,
    path::{Path, PathBuf},
};

use aya::Ebpf;
use aya::programs::cgroup_skb::CgroupSkbLinkId;
use aya::programs::{CgroupAttachMode, CgroupSkb, CgroupSkbAttachType};
use port_filter_common::PROGRAM_INGRESS;

use crate::error::AttachError;

/// The live binding of the filter to a cgroup's ingress hook.
///
/// Not `Clone`: the only way to release it is to hand it back to
/// [`detach_ingress`] (or a `Datapath::detach`), which consumes it.
#[derive(Debug)]
#[must_use = "an attachment must be detached exactly once"]
pub struct AttachmentHandle<L> {
    link: L,
    cgroup: PathBuf,
}

impl<L> AttachmentHandle<L> {
    pub fn new(link: L, cgroup: PathBuf) -> Self {
        Self { link, cgroup }
    }

    pub fn cgroup(&self) -> &Path {
        &self.cgroup
    }

    pub fn into_parts(self) -> (L, PathBuf) {
        (self.link, self.cgroup)
    }
}

fn ingress_program(bpf: &mut Ebpf) -> Result<&mut CgroupSkb, AttachError> {
    bpf.program_mut(PROGRAM_INGRESS)
        .ok_or(AttachError::MissingProgram(PROGRAM_INGRESS))?
        .try_into()
        .map_err(|source| AttachError::ProgramType {
            name: PROGRAM_INGRESS,
            source,
        })
}

/// Binds the already loaded ingress program to the cgroup at `cgroup`.
pub fn attach_ingress(
    bpf: &mut Ebpf,
    cgroup: &Path,
) -> Result<AttachmentHandle<CgroupSkbLinkId>, AttachError> {
    let dir = File::open(cgroup).map_err(|source| AttachError::OpenCgroup {
        path: cgroup.to_path_buf(),
        source,
    })?;
    let program = ingress_program(bpf)?;
    let link = program
        .attach(&dir, CgroupSkbAttachType::Ingress, CgroupAttachMode::Single)
        .map_err(|source| AttachError::Attach {
            path: cgroup.to_path_buf(),
            source,
        })?;
    Ok(AttachmentHandle::new(link, cgroup.to_path_buf()))
}

pub fn detach_ingress(
    bpf: &mut Ebpf,
    handle: AttachmentHandle<CgroupSkbLinkId>,
) -> Result<(), AttachError> {
    let (link, cgroup) = handle.into_parts();
    let program = ingress_program(bpf)?;
    program
        .detach(link)
        .map_err(|source| AttachError::Detach {
            path: cgroup,
            source,
        })
}
