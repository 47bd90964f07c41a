//! Session configuration
//!
//! Both structures are built once from the command line and never change
//! for the lifetime of the session.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Result, TardisError};

/// Default location of the companion shim that disables the vDSO fast path
pub const DEFAULT_PRELOAD: &str = "./novdso.so";

/// Time scaling factors for the session
///
/// `delay_factor` divides requested waits before they reach the kernel;
/// `time_factor` multiplies elapsed time on clock readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingConfig {
    delay_factor: f64,
    time_factor: f64,
}

impl ScalingConfig {
    /// Validate both factors: they must be finite and strictly positive
    pub fn new(delay_factor: f64, time_factor: f64) -> Result<Self> {
        check_factor("delay factor", delay_factor)?;
        check_factor("time factor", time_factor)?;
        Ok(Self {
            delay_factor,
            time_factor,
        })
    }

    pub fn delay_factor(&self) -> f64 {
        self.delay_factor
    }

    pub fn time_factor(&self) -> f64 {
        self.time_factor
    }

    /// Factor applied to a requested wait on its way into the kernel
    pub fn request_factor(&self) -> f64 {
        1.0 / self.delay_factor
    }

    /// Factor applied to unslept time reported back by the kernel
    pub fn remaining_factor(&self) -> f64 {
        self.delay_factor
    }
}

fn check_factor(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TardisError::Usage(format!(
            "{} must be a positive number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Parse a factor argument from the command line
pub fn parse_factor(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("'{}' must be a positive number", raw));
    }
    Ok(value)
}

/// What to launch and how to prepare its environment
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub command: Vec<String>,
    /// Shim to inject through `LD_PRELOAD`, if any
    pub preload: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(command: Vec<String>, preload: Option<PathBuf>) -> Result<Self> {
        if command.is_empty() {
            return Err(TardisError::Usage("missing COMMAND".to_string()));
        }
        Ok(Self { command, preload })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    /// Value for `LD_PRELOAD` in the child, keeping any existing entries
    pub fn preload_value(&self, existing: Option<OsString>) -> Option<OsString> {
        let shim = self.preload.as_deref()?;
        let mut value = OsString::from(shim.as_os_str());
        if let Some(existing) = existing.filter(|e| !e.is_empty()) {
            value.push(":");
            value.push(existing);
        }
        Some(value)
    }
}

/// Whether the shim file can actually be loaded by the target
pub fn preload_exists(path: &Path) -> bool {
    path.is_file()
}
