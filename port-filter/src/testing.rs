//! In-memory datapath for exercising the control loop without a kernel.

use std::{
    cell::{Cell, RefCell},
    path::{Path, PathBuf},
    rc::Rc,
};

use aya::maps::MapError;

use crate::attach::AttachmentHandle;
use crate::config::tests::MemorySlots;
use crate::config::{ConfigSlots, FilterConfig, publish};
use crate::error::{AttachError, ConfigError, ReadError};
use crate::supervisor::Datapath;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Publish(FilterConfig),
    Attach(PathBuf),
    Sample,
    Detach(u32),
    Close,
}

#[derive(Default)]
pub struct FakeDatapath {
    pub(crate) calls: Rc<RefCell<Vec<Call>>>,
    pub(crate) counter: Rc<Cell<u64>>,
    pub(crate) fail_reads: Rc<Cell<bool>>,
    pub(crate) slots: MemorySlots,
    pub(crate) reject_attach: bool,
    pub(crate) reject_detach: bool,
    pub(crate) next_link: u32,
}

impl FakeDatapath {
    pub fn calls(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.calls)
    }

    /// The "kernel side" of the drop counter.
    pub fn counter(&self) -> Rc<Cell<u64>> {
        Rc::clone(&self.counter)
    }

    pub fn fail_reads(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.fail_reads)
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

fn kernel_refusal() -> aya::programs::ProgramError {
    aya::programs::ProgramError::NotAttached
}

impl Datapath for FakeDatapath {
    type Link = u32;

    fn publish(&mut self, port: u32, process_name: &str) -> Result<FilterConfig, ConfigError> {
        let config = publish(&mut self.slots, port, process_name)?;
        self.record(Call::Publish(self.slots.read()?));
        Ok(config)
    }

    fn attach(&mut self, cgroup: &Path) -> Result<AttachmentHandle<u32>, AttachError> {
        self.record(Call::Attach(cgroup.to_path_buf()));
        if self.reject_attach {
            return Err(AttachError::Attach {
                path: cgroup.to_path_buf(),
                source: kernel_refusal(),
            });
        }
        self.next_link += 1;
        Ok(AttachmentHandle::new(self.next_link, cgroup.to_path_buf()))
    }

    fn detach(&mut self, handle: AttachmentHandle<u32>) -> Result<(), AttachError> {
        let (link, cgroup) = handle.into_parts();
        self.record(Call::Detach(link));
        if self.reject_detach {
            return Err(AttachError::Detach {
                path: cgroup,
                source: kernel_refusal(),
            });
        }
        Ok(())
    }

    fn sample(&self) -> Result<u64, ReadError> {
        self.record(Call::Sample);
        if self.fail_reads.get() {
            return Err(ReadError::Lookup(MapError::KeyNotFound));
        }
        Ok(self.counter.get())
    }

    fn close(self) {
        self.record(Call::Close);
    }
}
