use std::{future::Future, io, path::Path, time::Duration};

use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::attach::AttachmentHandle;
use crate::config::FilterConfig;
use crate::error::{AttachError, ConfigError, ReadError};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Everything the control plane needs from the loaded kernel objects.
///
/// Implemented by the aya-backed `LoadedFilter`; tests substitute an
/// in-memory fake.
pub trait Datapath {
    type Link;

    fn publish(&mut self, port: u32, process_name: &str) -> Result<FilterConfig, ConfigError>;
    fn attach(&mut self, cgroup: &Path) -> Result<AttachmentHandle<Self::Link>, AttachError>;
    fn detach(&mut self, handle: AttachmentHandle<Self::Link>) -> Result<(), AttachError>;
    fn sample(&self) -> Result<u64, ReadError>;
    /// Releases program and map handles. Called once, after any detach.
    fn close(self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Running,
    Draining,
    Terminated,
}

/// What the loop observed by the time it reached `Terminated`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Outcome {
    pub state: State,
    pub samples: u64,
    pub last_sample: Option<u64>,
}

/// Owns the datapath and its single attachment from attach until exit.
pub struct Supervisor<D: Datapath> {
    datapath: D,
    attachment: AttachmentHandle<D::Link>,
    report_interval: Duration,
    state: State,
    samples: u64,
    last_sample: Option<u64>,
}

impl<D: Datapath> Supervisor<D> {
    pub fn new(
        datapath: D,
        attachment: AttachmentHandle<D::Link>,
        report_interval: Duration,
    ) -> Self {
        Self {
            datapath,
            attachment,
            report_interval,
            state: State::Running,
            samples: 0,
            last_sample: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cgroup(&self) -> &Path {
        self.attachment.cgroup()
    }

    pub fn last_sample(&self) -> Option<u64> {
        self.last_sample
    }

    /// Samples the drop counter once and reports it. A failed read is logged
    /// and leaves the last reported value untouched.
    pub fn tick(&mut self) -> Option<u64> {
        match self.datapath.sample() {
            Ok(count) => {
                self.samples += 1;
                self.last_sample = Some(count);
                log::info!("Dropped {count} packets");
                Some(count)
            }
            Err(err) => {
                log::warn!("{err}");
                None
            }
        }
    }

    /// Reports the counter every interval until `shutdown` resolves, then
    /// detaches and closes everything.
    ///
    /// `shutdown` is polled ahead of the ticker, so once it is ready no
    /// further sample is taken even if a tick is due at the same instant.
    pub async fn run<S>(mut self, shutdown: S) -> Result<Outcome, AttachError>
    where
        S: Future<Output = ()>,
    {
        let mut ticker = time::interval_at(
            Instant::now() + self.report_interval,
            self.report_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        while self.state == State::Running {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    log::info!("Received signal, exiting...");
                    self.state = State::Draining;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        drop(ticker);

        self.teardown()
    }

    fn teardown(self) -> Result<Outcome, AttachError> {
        let Self {
            mut datapath,
            attachment,
            samples,
            last_sample,
            ..
        } = self;

        let cgroup = attachment.cgroup().to_path_buf();
        // The attachment references the program, so it goes first.
        let detached = datapath.detach(attachment);
        datapath.close();
        detached?;
        log::info!("Detached cgroup program from {}", cgroup.display());

        Ok(Outcome {
            state: State::Terminated,
            samples,
            last_sample,
        })
    }
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// Handlers are installed when this is called, so call it before anything
/// is attached.
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => log::debug!("received SIGINT"),
            _ = terminate.recv() => log::debug!("received SIGTERM"),
        }
    })
}
