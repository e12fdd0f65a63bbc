//! DS18B20 soil temperature probe on the Linux 1-wire bus.
//!
//! The `w1-therm` kernel driver exposes each probe as
//! `<root>/<device>/w1_slave`; reading the file triggers a conversion and
//! returns two lines:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` when the CRC matched; the second carries the
//! temperature in milli-degrees Celsius.
//!
//! Without a configured device name the probe binds to the first device
//! under `root` that exposes a `w1_slave` file, and keeps that binding.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::info;

use crate::app::ports::SensorDevice;
use crate::error::SensorFault;
use crate::measurement::{Quantity, Value};

/// Power-on reset value of the scratchpad (85 °C): no conversion happened.
const POWER_ON_MILLI_C: i32 = 85_000;

const SLAVE_FILE: &str = "w1_slave";

pub struct Ds18b20 {
    root: PathBuf,
    path: Option<PathBuf>,
}

impl Ds18b20 {
    pub fn new(root: impl AsRef<Path>, device: &str) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            path: Some(root.join(device).join(SLAVE_FILE)),
            root,
        }
    }

    /// A probe bound to whichever device [`discover`] finds first.
    pub fn first_found(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn bound_path(&mut self) -> Result<&Path, SensorFault> {
        if self.path.is_none() {
            let device = discover(&self.root)
                .map_err(|_| SensorFault::Disconnected)?
                .into_iter()
                .next()
                .ok_or(SensorFault::Disconnected)?;
            info!("1-wire: using probe {device} under {}", self.root.display());
            self.path = Some(self.root.join(device).join(SLAVE_FILE));
        }
        self.path.as_deref().ok_or(SensorFault::Disconnected)
    }
}

impl SensorDevice for Ds18b20 {
    fn quantity(&self) -> Quantity {
        Quantity::Temperature
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        let path = self.bound_path()?;
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SensorFault::Disconnected,
            ErrorKind::InvalidData => SensorFault::Malformed,
            _ => SensorFault::Bus,
        })?;
        parse_w1_slave(&text).map(Value::Temperature)
    }
}

/// Names of the 1-wire devices under `root` that expose a `w1_slave` file,
/// sorted.  Bus masters are skipped.
pub fn discover(root: &Path) -> io::Result<Vec<String>> {
    let mut found: Vec<String> = std::fs::read_dir(root)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name().into_string().ok()?;
            let usable = !name.starts_with("w1_bus_master")
                && entry.path().join(SLAVE_FILE).is_file();
            usable.then_some(name)
        })
        .collect();
    found.sort();
    Ok(found)
}

/// Parse the two-line `w1_slave` payload into degrees Celsius.
pub fn parse_w1_slave(text: &str) -> Result<f32, SensorFault> {
    let mut lines = text.lines().map(str::trim_end);
    let crc_line = lines.next().ok_or(SensorFault::Malformed)?;
    if crc_line.is_empty() {
        return Err(SensorFault::Malformed);
    }
    if !crc_line.ends_with("YES") {
        return Err(SensorFault::ChecksumMismatch);
    }

    let data_line = lines.next().ok_or(SensorFault::Malformed)?;
    let milli = data_line
        .rsplit_once("t=")
        .and_then(|(_, t)| t.trim().parse::<i32>().ok())
        .ok_or(SensorFault::Malformed)?;
    if milli == POWER_ON_MILLI_C {
        return Err(SensorFault::NotReady);
    }
    Ok(milli as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn parses_milli_celsius() {
        assert!((parse_w1_slave(GOOD).unwrap() - 23.125).abs() < 1e-4);
    }

    #[test]
    fn negative_temperatures_parse() {
        let text = "ff ff : crc=1a YES\nff ff t=-1250\n";
        assert!((parse_w1_slave(text).unwrap() + 1.25).abs() < 1e-4);
    }

    #[test]
    fn crc_failure_is_checksum_mismatch() {
        let text = "72 01 : crc=57 NO\n72 01 t=23125\n";
        assert_eq!(parse_w1_slave(text), Err(SensorFault::ChecksumMismatch));
    }

    #[test]
    fn power_on_value_is_not_ready() {
        let text = "50 05 : crc=a1 YES\n50 05 t=85000\n";
        assert_eq!(parse_w1_slave(text), Err(SensorFault::NotReady));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        assert_eq!(parse_w1_slave(""), Err(SensorFault::Malformed));
        assert_eq!(
            parse_w1_slave("72 01 : crc=57 YES\n"),
            Err(SensorFault::Malformed)
        );
        assert_eq!(
            parse_w1_slave("72 01 : crc=57 YES\n72 01 t=abc\n"),
            Err(SensorFault::Malformed)
        );
    }

    #[test]
    fn reads_from_sysfs_layout() {
        let root = std::env::temp_dir().join(format!("w1-test-{}", std::process::id()));
        let dev = root.join("28-0316a2794bff");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(dev.join("w1_slave"), GOOD).unwrap();

        let mut probe = Ds18b20::new(&root, "28-0316a2794bff");
        assert_eq!(probe.sample(), Ok(Value::Temperature(23.125)));

        let mut missing = Ds18b20::new(&root, "28-000000000000");
        assert_eq!(missing.sample(), Err(SensorFault::Disconnected));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn non_utf8_payload_is_malformed() {
        let root = std::env::temp_dir().join(format!("w1-garbage-{}", std::process::id()));
        let dev = root.join("28-00000000beef");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(dev.join("w1_slave"), [0xff, 0xfe, 0x00, 0x9c]).unwrap();

        let mut probe = Ds18b20::new(&root, "28-00000000beef");
        assert_eq!(probe.sample(), Err(SensorFault::Malformed));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn unnamed_probe_binds_to_the_first_device_found() {
        let root = std::env::temp_dir().join(format!("w1-scan-{}", std::process::id()));
        std::fs::create_dir_all(root.join("w1_bus_master1")).unwrap();
        std::fs::write(root.join("w1_bus_master1").join("w1_slave"), "").unwrap();

        let mut probe = Ds18b20::first_found(&root);
        assert_eq!(probe.sample(), Err(SensorFault::Disconnected));
        assert!(probe.path().is_none());

        for name in ["28-0000000000b2", "28-0000000000a1"] {
            std::fs::create_dir_all(root.join(name)).unwrap();
            std::fs::write(root.join(name).join("w1_slave"), GOOD).unwrap();
        }
        std::fs::create_dir_all(root.join("28-0000000000a0")).unwrap();

        assert_eq!(
            discover(&root).unwrap(),
            vec!["28-0000000000a1".to_string(), "28-0000000000b2".to_string()]
        );
        assert_eq!(probe.sample(), Ok(Value::Temperature(23.125)));
        assert!(probe.path().unwrap().starts_with(root.join("28-0000000000a1")));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
