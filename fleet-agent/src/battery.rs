//! Battery level of the local machine, when it has one.
//!
//! Linux and Android read `capacity` under `/sys/class/power_supply`, macOS
//! parses `pmset -g batt`. Other platforms, and machines without a battery,
//! yield `None`.

use tracing::debug;

/// Charge in percent, `None` when no battery is found.
pub fn detect_battery() -> Option<f64> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        detect_battery_sysfs(std::path::Path::new("/sys/class/power_supply"))
    }

    #[cfg(target_os = "macos")]
    {
        detect_battery_macos()
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    {
        None
    }
}

/// Parses a sysfs `capacity` file (`"87\n"`).
pub fn parse_capacity(content: &str) -> Option<f64> {
    let level: u8 = content.trim().parse().ok()?;
    (level <= 100).then_some(f64::from(level))
}

#[cfg_attr(not(any(target_os = "macos", test)), allow(dead_code))]
/// Parses `pmset -g batt` output such as
/// `-InternalBattery-0 (id=1234)	85%; charging; 1:02 remaining`.
pub fn parse_pmset(output: &str) -> Option<f64> {
    let line = output.lines().find(|l| l.contains("InternalBattery"))?;
    line.split_whitespace()
        .find(|w| w.ends_with("%;") || w.ends_with('%'))
        .and_then(|w| parse_capacity(w.trim_end_matches(';').trim_end_matches('%')))
}

/// First `BAT*` supply (or Android's `battery`) with a readable capacity.
#[cfg(any(target_os = "linux", target_os = "android", test))]
fn detect_battery_sysfs(base: &std::path::Path) -> Option<f64> {
    let entries = std::fs::read_dir(base).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.starts_with("BAT") || name == "battery") {
            continue;
        }
        let capacity = std::fs::read_to_string(entry.path().join("capacity")).ok();
        if let Some(level) = capacity.as_deref().and_then(parse_capacity) {
            debug!(supply = %name, level, "battery detected");
            return Some(level);
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn detect_battery_macos() -> Option<f64> {
    let output = std::process::Command::new("pmset")
        .args(["-g", "batt"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let level = parse_pmset(&String::from_utf8_lossy(&output.stdout))?;
    debug!(level, "battery detected");
    Some(level)
}
