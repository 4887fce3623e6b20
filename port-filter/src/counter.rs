use std::{
    fs, io,
    path::{Path, PathBuf},
};

use aya::Ebpf;
use aya::maps::{Array, IterableMap, Map, MapData};
use aya::pin::PinError;
use chrono::{DateTime, SecondsFormat, Utc};
use port_filter_common::{CONFIG_SLOT, MAP_DROP_COUNTER};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};

use crate::config::take_array;
use crate::error::{LoadError, ReadError};

pub const DEFAULT_COUNTER_PIN: &str = "/sys/fs/bpf/port_filter/drop_counter";

/// Read-only handle on the kernel's drop counter.
pub struct DropCounter {
    map: Array<MapData, u64>,
    pin: Option<PathBuf>,
}

impl DropCounter {
    /// Takes the counter map out of `bpf` and, if `pin` is given, pins it
    /// there. A map of the wrong type is rejected before anything is pinned.
    pub fn take_from(bpf: &mut Ebpf, pin: Option<&Path>) -> Result<Self, LoadError> {
        let map = take_array(bpf, MAP_DROP_COUNTER)?;
        if let Some(path) = pin {
            pin_counter(&map, path)?;
        }
        Ok(Self {
            map,
            pin: pin.map(Path::to_path_buf),
        })
    }

    /// One map lookup; no snapshot semantics against concurrent increments.
    pub fn sample(&self) -> Result<u64, ReadError> {
        self.map.get(&CONFIG_SLOT, 0).map_err(ReadError::Lookup)
    }

    /// Removes the pin, then closes the map handle.
    pub fn close(self) {
        if let Some(path) = &self.pin {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("unpinned drop counter at {}", path.display()),
                Err(err) => log::warn!("failed to unpin {}: {err}", path.display()),
            }
        }
    }
}

fn pin_counter(map: &Array<MapData, u64>, path: &Path) -> Result<(), LoadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LoadError::PinPath {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let map = map.map();
    let pin_err = |source| LoadError::Pin {
        map: MAP_DROP_COUNTER,
        path: path.to_path_buf(),
        source,
    };
    match map.pin(path) {
        Ok(()) => Ok(()),
        // Left behind by a previous run that did not shut down cleanly.
        Err(PinError::SyscallError(err)) if err.io_error.kind() == io::ErrorKind::AlreadyExists => {
            log::warn!("replacing stale pin at {}", path.display());
            fs::remove_file(path).map_err(|source| LoadError::PinPath {
                path: path.to_path_buf(),
                source,
            })?;
            map.pin(path).map_err(pin_err)
        }
        Err(err) => Err(pin_err(err)),
    }
}

/// Reads the drop counter pinned at `pin_path` by a running filter.
pub fn read_pinned(pin_path: impl AsRef<Path>) -> Result<u64, ReadError> {
    let pin = pin_path.as_ref();
    let pinned = |source| ReadError::Pinned {
        path: pin.to_path_buf(),
        source,
    };

    let map_data = MapData::from_pin(pin).map_err(pinned)?;
    let array = Array::<_, u64>::try_from(Map::Array(map_data)).map_err(pinned)?;
    array.get(&CONFIG_SLOT, 0).map_err(ReadError::Lookup)
}

/// Renders a sample as `{"dropped_packets": N, "sampled_at": "<rfc3339>"}`.
pub fn stats_json(dropped: u64, sampled_at: DateTime<Utc>) -> Value {
    let mut obj = JsonMap::new();
    obj.insert(
        "dropped_packets".to_string(),
        Value::Number(JsonNumber::from(dropped)),
    );
    obj.insert(
        "sampled_at".to_string(),
        Value::String(sampled_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    Value::Object(obj)
}
