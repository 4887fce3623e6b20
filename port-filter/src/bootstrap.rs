use std::{path::PathBuf, time::Duration};

use crate::cgroup::{DEFAULT_MOUNT_TABLE, resolve_cgroup_path};
use crate::config::{DEFAULT_PORT, DEFAULT_PROCESS_NAME};
use crate::error::{LoadError, StartupError};
use crate::supervisor::{DEFAULT_REPORT_INTERVAL, Datapath, Supervisor};

#[derive(Clone, Debug)]
pub struct FilterOptions {
    pub port: u32,
    pub process_name: String,
    pub mount_table: PathBuf,
    pub report_interval: Duration,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// Brings the filter up: resolve cgroup, load, publish, attach.
///
/// Every stage that fails aborts before the attach, so an `Err` never leaves
/// a program bound to a cgroup. `load` is not called at all when no cgroup2
/// mount exists.
pub fn bootstrap<D, F>(opts: &FilterOptions, load: F) -> Result<Supervisor<D>, StartupError>
where
    D: Datapath,
    F: FnOnce() -> Result<D, LoadError>,
{
    let cgroup = resolve_cgroup_path(&opts.mount_table)?;
    log::debug!("using cgroup {}", cgroup.display());

    let mut datapath = load()?;

    let config = match datapath.publish(opts.port, &opts.process_name) {
        Ok(config) => config,
        Err(err) => {
            datapath.close();
            return Err(err.into());
        }
    };
    log::info!(
        "Filtering process `{}`: only TCP port {} allowed",
        config.process_name(),
        config.port
    );

    let attachment = match datapath.attach(&cgroup) {
        Ok(attachment) => attachment,
        Err(err) => {
            datapath.close();
            return Err(err.into());
        }
    };
    log::info!("Attached cgroup program to {}", cgroup.display());

    Ok(Supervisor::new(datapath, attachment, opts.report_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::error::{AttachError, CgroupError};
    use crate::supervisor::State;
    use crate::testing::{Call, FakeDatapath};
    use std::cell::Cell;
    use std::io::Write;
    use std::path::Path;
    use tempfile::NamedTempFile;

    fn mount_table(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn options(table: &NamedTempFile) -> FilterOptions {
        FilterOptions {
            mount_table: table.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let opts = FilterOptions::default();
        assert_eq!(opts.port, 4040);
        assert_eq!(opts.process_name, "go");
        assert_eq!(opts.mount_table, PathBuf::from("/proc/mounts"));
        assert_eq!(opts.report_interval, Duration::from_secs(10));
    }

    #[test]
    fn missing_cgroup2_never_loads() {
        let table = mount_table("proc /proc proc rw 0 0\ncgroup /sys/fs/cgroup/cpu cgroup rw 0 0\n");
        let loaded = Cell::new(false);

        let result = bootstrap(&options(&table), || {
            loaded.set(true);
            Ok(FakeDatapath::default())
        });

        assert!(matches!(
            result,
            Err(StartupError::Cgroup(CgroupError::NotMounted))
        ));
        assert!(!loaded.get());
    }

    #[test]
    fn load_failure_aborts_before_attach() {
        let table = mount_table("cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        let result = bootstrap::<FakeDatapath, _>(&options(&table), || Err(LoadError::NoImage));
        let err = result.err().expect("bootstrap should fail");
        assert!(matches!(err, StartupError::Load(LoadError::NoImage)));
        assert!(err.to_string().starts_with("loading filter"));
    }

    #[test]
    fn config_failure_closes_without_attaching() {
        let table = mount_table("cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        let mut fake = FakeDatapath::default();
        fake.slots.reject_port = true;
        let calls = fake.calls();

        let result = bootstrap(&options(&table), || Ok(fake));

        assert!(matches!(result, Err(StartupError::Config(_))));
        assert_eq!(*calls.borrow(), vec![Call::Close]);
    }

    #[test]
    fn rejected_attach_closes_and_never_detaches() {
        let table = mount_table("cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        let fake = FakeDatapath {
            reject_attach: true,
            ..Default::default()
        };
        let calls = fake.calls();

        let result = bootstrap(&options(&table), || Ok(fake));

        assert!(matches!(
            result,
            Err(StartupError::Attach(AttachError::Attach { .. }))
        ));
        let calls = calls.borrow();
        assert!(calls.iter().all(|call| !matches!(call, Call::Detach(_))));
        assert_eq!(calls.last(), Some(&Call::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_reports_cumulative_drops() {
        let table = mount_table("cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        let fake = FakeDatapath::default();
        let calls = fake.calls();
        let kernel = fake.counter();

        let mut supervisor = bootstrap(&options(&table), || Ok(fake)).unwrap();
        assert_eq!(supervisor.cgroup(), Path::new("/sys/fs/cgroup"));
        assert_eq!(supervisor.state(), State::Running);

        let mut reported = Vec::new();
        for increment in [5, 3, 0] {
            kernel.set(kernel.get() + increment);
            reported.push(supervisor.tick().unwrap());
        }
        assert_eq!(reported, vec![5, 8, 8]);

        let outcome = supervisor.run(std::future::ready(())).await.unwrap();
        assert_eq!(outcome.state, State::Terminated);
        assert_eq!(outcome.last_sample, Some(8));

        let calls = calls.borrow();
        assert_eq!(
            calls[..2],
            [
                Call::Publish(FilterConfig::new(4040, "go")),
                Call::Attach(PathBuf::from("/sys/fs/cgroup")),
            ]
        );
        let detaches = calls
            .iter()
            .filter(|call| matches!(call, Call::Detach(_)))
            .count();
        assert_eq!(detaches, 1);
        assert_eq!(calls[calls.len() - 2..], [Call::Detach(1), Call::Close]);
    }

    #[test]
    fn published_config_is_readable_back() {
        let table = mount_table("cgroup2 /sys/fs/cgroup cgroup2 rw 0 0\n");
        let opts = FilterOptions {
            port: 8443,
            process_name: "a-process-name-longer-than-comm".to_string(),
            ..options(&table)
        };
        let fake = FakeDatapath::default();
        let calls = fake.calls();

        let _supervisor = bootstrap(&opts, || Ok(fake)).unwrap();

        let expected = FilterConfig::new(8443, "a-process-name-longer-than-comm");
        assert_eq!(&expected.process.bytes, b"a-process-name-l");
        assert_eq!(calls.borrow()[0], Call::Publish(expected));
    }
}
