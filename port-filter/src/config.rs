use std::borrow::Cow;

use aya::Ebpf;
use aya::maps::{Array, MapData};
use port_filter_common::{
    COMM_NAME_MAX, CONFIG_SLOT, MAP_PORT, MAP_PROCESS_NAME, PROCESS_NAME_LEN, ProcessName,
};

use crate::error::{ConfigError, LoadError};

pub const DEFAULT_PORT: u32 = 4040;
pub const DEFAULT_PROCESS_NAME: &str = "go";

/// The single rule the kernel side enforces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FilterConfig {
    pub port: u32,
    pub process: ProcessName,
}

impl FilterConfig {
    /// Names longer than the comm buffer are truncated, shorter ones zero-padded.
    pub fn new(port: u32, process_name: &str) -> Self {
        Self {
            port,
            process: ProcessName::from_bytes(process_name.as_bytes()),
        }
    }

    pub fn process_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.process.trimmed())
    }
}

/// The two key-0 slots the kernel side reads its rule from.
pub trait ConfigSlots {
    fn write_port(&mut self, port: u32) -> Result<(), ConfigError>;
    fn write_process(&mut self, name: &ProcessName) -> Result<(), ConfigError>;
    fn read(&self) -> Result<FilterConfig, ConfigError>;
}

/// Writes `port` and `process_name` into `slots`.
///
/// The two fields are separate map updates; a reader may observe the new
/// port before the new name.
pub fn publish<S>(slots: &mut S, port: u32, process_name: &str) -> Result<FilterConfig, ConfigError>
where
    S: ConfigSlots + ?Sized,
{
    let config = FilterConfig::new(port, process_name);
    if process_name.len() > config.process.bytes.len() {
        log::warn!(
            "process name `{process_name}` truncated to `{}`",
            config.process_name()
        );
    }
    if !config.process.fits_comm() {
        log::warn!(
            "process name `{}` is {PROCESS_NAME_LEN} bytes; kernel comm holds at most {COMM_NAME_MAX}, so no process will match",
            config.process_name()
        );
    }
    slots.write_port(config.port)?;
    slots.write_process(&config.process)?;
    Ok(config)
}

/// Owned handles on the port and process-name maps.
pub struct ConfigMaps {
    port: Array<MapData, u32>,
    process: Array<MapData, ProcessName>,
}

impl ConfigMaps {
    pub fn take_from(bpf: &mut Ebpf) -> Result<Self, LoadError> {
        Ok(Self {
            port: take_array(bpf, MAP_PORT)?,
            process: take_array(bpf, MAP_PROCESS_NAME)?,
        })
    }
}

pub(crate) fn take_array<V: aya::Pod>(
    bpf: &mut Ebpf,
    map_name: &'static str,
) -> Result<Array<MapData, V>, LoadError> {
    let map = bpf
        .take_map(map_name)
        .ok_or(LoadError::MissingMap(map_name))?;
    Array::try_from(map).map_err(|source| LoadError::MapType {
        map: map_name,
        source,
    })
}

impl ConfigSlots for ConfigMaps {
    fn write_port(&mut self, port: u32) -> Result<(), ConfigError> {
        self.port
            .set(CONFIG_SLOT, port, 0)
            .map_err(|source| ConfigError::Update {
                map: MAP_PORT,
                source,
            })
    }

    fn write_process(&mut self, name: &ProcessName) -> Result<(), ConfigError> {
        self.process
            .set(CONFIG_SLOT, name, 0)
            .map_err(|source| ConfigError::Update {
                map: MAP_PROCESS_NAME,
                source,
            })
    }

    fn read(&self) -> Result<FilterConfig, ConfigError> {
        let port = self
            .port
            .get(&CONFIG_SLOT, 0)
            .map_err(|source| ConfigError::Lookup {
                map: MAP_PORT,
                source,
            })?;
        let process = self
            .process
            .get(&CONFIG_SLOT, 0)
            .map_err(|source| ConfigError::Lookup {
                map: MAP_PROCESS_NAME,
                source,
            })?;
        Ok(FilterConfig { port, process })
    }
}
