// src/config/config.rs
use crate::topology::CoreFill;
use crate::types::{AlgorithmType, BackendKind};
use crate::utils::error::MinerError;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the engine
///
/// Contains the default algorithm, reporting settings and one section per
/// backend kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Algorithm used when a job does not name one
    #[serde(default = "default_algorithm")]
    pub algorithm: AlgorithmType,

    /// Seconds between speed reports (0 = never)
    #[serde(default = "default_print_time")]
    pub print_time: u64,

    /// Log level: off, error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// CPU backend settings
    #[serde(default)]
    pub cpu: CpuConfig,

    /// CUDA backend settings
    #[serde(default)]
    pub cuda: GpuConfig,

    /// OpenCL backend settings
    #[serde(default)]
    pub opencl: GpuConfig,
}

/// `[cpu]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuConfig {
    /// Run CPU lanes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Request huge pages for scratchpads
    #[serde(default = "default_true")]
    pub huge_pages: bool,

    /// Lanes per thread (1..=5); unset uses the planner's choice
    #[serde(default)]
    pub intensity: Option<usize>,

    /// Upper bound on threads (0 = no limit)
    #[serde(default)]
    pub max_threads: usize,

    /// Pin threads to the planned hardware thread
    #[serde(default = "default_true")]
    pub affinity: bool,

    /// Core fill order when a cache cannot feed every hardware thread
    #[serde(default)]
    pub fill: CoreFill,

    /// Topology description to use instead of detecting one
    #[serde(default)]
    pub topology: Option<PathBuf>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        CpuConfig {
            enabled: true,
            huge_pages: true,
            intensity: None,
            max_threads: 0,
            affinity: true,
            fill: CoreFill::default(),
            topology: None,
        }
    }
}

/// `[cuda]` / `[opencl]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuConfig {
    /// Run lanes on this kind of device
    #[serde(default)]
    pub enabled: bool,

    /// Path of the vendor device library
    #[serde(default)]
    pub loader: Option<PathBuf>,

    /// Threads to run; empty means one per detected device
    #[serde(default)]
    pub devices: Vec<GpuThreadConfig>,
}

/// One GPU thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuThreadConfig {
    /// Device index within the vendor library
    pub index: usize,

    /// Nonces per batch (0 = backend default)
    #[serde(default)]
    pub intensity: u32,

    /// Work-group / block size
    #[serde(default = "default_worksize")]
    pub worksize: u32,

    /// Host CPU to pin the feeding thread to
    #[serde(default)]
    pub affinity: Option<usize>,
}

fn default_algorithm() -> AlgorithmType {
    AlgorithmType::CnV1
}

fn default_print_time() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

fn default_worksize() -> u32 {
    8
}

impl Default for Config {
    fn default() -> Self {
        Config {
            algorithm: default_algorithm(),
            print_time: default_print_time(),
            log_level: default_log_level(),
            cpu: CpuConfig::default(),
            cuda: GpuConfig::default(),
            opencl: GpuConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!("Failed to read config at {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects out-of-range values
    pub fn validate(&self) -> Result<(), MinerError> {
        self.level_filter()?;

        if let Some(intensity) = self.cpu.intensity {
            if !(1..=5).contains(&intensity) {
                return Err(MinerError::ConfigError(format!(
                    "cpu.intensity must be between 1 and 5, got {}",
                    intensity
                )));
            }
        }

        for (kind, gpu) in [(BackendKind::Cuda, &self.cuda), (BackendKind::OpenCl, &self.opencl)] {
            for device in &gpu.devices {
                if device.worksize == 0 {
                    return Err(MinerError::ConfigError(format!(
                        "{}.devices[{}].worksize must be positive",
                        kind, device.index
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parsed [`log_level`](Self::log_level)
    pub fn level_filter(&self) -> Result<LevelFilter, MinerError> {
        self.log_level
            .parse()
            .map_err(|_| MinerError::ConfigError(format!("unknown log level '{}'", self.log_level)))
    }

    /// Section of a GPU backend kind
    pub fn gpu(&self, kind: BackendKind) -> Option<&GpuConfig> {
        match kind {
            BackendKind::Cpu => None,
            BackendKind::Cuda => Some(&self.cuda),
            BackendKind::OpenCl => Some(&self.opencl),
        }
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `cuda` - Include an enabled CUDA section with one device
    /// * `opencl` - Include an enabled OpenCL section with one device
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(cuda: bool, opencl: bool) -> String {
        let mut template = String::new();
        template.push_str("# Nonce engine configuration\n\n");
        template.push_str("# Algorithm for jobs that do not name one:\n");
        template.push_str("# cn/0, cn/1, cn-lite/0, cn-lite/1, cn-heavy/0\n");
        template.push_str("algorithm = \"cn/1\"\n");
        template.push_str("# Seconds between speed reports (0 = never)\n");
        template.push_str("print_time = 60\n");
        template.push_str("log_level = \"info\"\n\n");

        template.push_str("[cpu]\n");
        template.push_str("enabled = true\n");
        template.push_str("huge_pages = true\n");
        template.push_str("# Lanes per thread, 1..=5 (omit to let the planner decide)\n");
        template.push_str("# intensity = 1\n");
        template.push_str("# Thread limit (0 = no limit)\n");
        template.push_str("max_threads = 0\n");
        template.push_str("affinity = true\n");
        template.push_str("# pack: fill both hardware threads of a core first; spread: one per core first\n");
        template.push_str("fill = \"pack\"\n");
        template.push_str("# topology = \"topology.toml\"\n");

        for (kind, enabled, intensity) in [("cuda", cuda, 32768), ("opencl", opencl, 4096)] {
            template.push_str(&format!("\n[{}]\n", kind));
            template.push_str(&format!("enabled = {}\n", enabled));
            template.push_str("# loader = \"/path/to/device-library\"\n");
            if enabled {
                template.push_str(&format!("\n[[{}.devices]]\n", kind));
                template.push_str("index = 0\n");
                template.push_str(&format!("intensity = {}\n", intensity));
                template.push_str("worksize = 8\n");
            }
        }

        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.algorithm, AlgorithmType::CnV1);
        assert!(config.cpu.enabled && config.cpu.huge_pages && config.cpu.affinity);
        assert_eq!(config.cpu.fill, CoreFill::Pack);
        assert!(!config.cuda.enabled && !config.opencl.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn templates_parse_back() {
        for (cuda, opencl) in [(false, false), (true, false), (true, true)] {
            let config: Config = toml::from_str(&Config::generate_template(cuda, opencl)).unwrap();
            config.validate().unwrap();
            assert_eq!(config.cuda.enabled, cuda);
            assert_eq!(config.opencl.enabled, opencl);
            assert_eq!(config.cuda.devices.len(), usize::from(cuda));
        }
    }

    #[test]
    fn sections_parse() {
        let config: Config = toml::from_str(
            r#"
algorithm = "cn-lite/1"
log_level = "debug"

[cpu]
intensity = 2
fill = "spread"

[[opencl.devices]]
index = 1
intensity = 1024
"#,
        )
        .unwrap();
        assert_eq!(config.algorithm, AlgorithmType::CnLiteV1);
        assert_eq!(config.cpu.intensity, Some(2));
        assert_eq!(config.cpu.fill, CoreFill::Spread);
        assert_eq!(config.opencl.devices[0].worksize, 8);
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = Config::default();
        config.cpu.intensity = Some(6);
        assert!(matches!(config.validate(), Err(MinerError::ConfigError(_))));

        let mut config = Config::default();
        config.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cuda.devices.push(GpuThreadConfig {
            index: 0,
            intensity: 0,
            worksize: 0,
            affinity: None,
        });
        assert!(config.validate().is_err());
    }
}
