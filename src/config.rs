use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

use crate::{Error, InternalResult};

/// Top level settings for a task engine and the bundled sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(s: &str) -> InternalResult<Self> {
        let config: Self = from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InternalResult<()> {
        if self.execution.tick_budget == 0 {
            return Err(Error::InvalidConfig(
                "execution.tick_budget must be positive".to_string(),
            ));
        }
        let SchedulerConfig {
            backoff_numerator: num,
            backoff_denominator: den,
            ..
        } = self.scheduler;
        if den <= 0 || num < 0 || num >= den {
            return Err(Error::InvalidConfig(format!(
                "scheduler backoff {}/{} must be a fraction below one",
                num, den
            )));
        }
        if self.sandbox.width == 0 || self.sandbox.depth == 0 || self.sandbox.height == 0 {
            return Err(Error::InvalidConfig(
                "sandbox dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    /// Time units every running program receives per tick.
    #[serde(default = "default_tick_budget")]
    pub tick_budget: u32,

    /// Printed lines kept per program before the oldest are dropped.
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tick_budget: default_tick_budget(),
            max_output_lines: default_max_output_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub default_priority: i32,

    /// A reclaimed task keeps `numerator / denominator` of its priority.
    #[serde(default = "default_backoff_numerator")]
    pub backoff_numerator: i32,

    #[serde(default = "default_backoff_denominator")]
    pub backoff_denominator: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_priority: 0,
            backoff_numerator: default_backoff_numerator(),
            backoff_denominator: default_backoff_denominator(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    #[serde(default = "default_extent")]
    pub width: i32,

    #[serde(default = "default_extent")]
    pub depth: i32,

    #[serde(default = "default_height")]
    pub height: i32,

    /// Ticks a unit spends working on a cube before it is done.
    #[serde(default = "default_work_ticks")]
    pub work_ticks: u32,

    #[serde(default)]
    pub seed: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            width: default_extent(),
            depth: default_extent(),
            height: default_height(),
            work_ticks: default_work_ticks(),
            seed: 0,
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_tick_budget() -> u32 {
    10
}

fn default_max_output_lines() -> usize {
    256
}

fn default_backoff_numerator() -> i32 {
    3
}

fn default_backoff_denominator() -> i32 {
    4
}

fn default_extent() -> i32 {
    16
}

fn default_height() -> i32 {
    4
}

fn default_work_ticks() -> u32 {
    3
}
