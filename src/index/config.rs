use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::file_operations::{atomic_save_json, read_json, FileOperationError};

pub const ENGINE_CONFIG_FILE: &str = "index_engine_config.json";

fn default_flush_index_to_disk_size_mb() -> usize {
    5
}

fn default_max_index_writes_before_recreate() -> usize {
    256 * 1024
}

fn default_new_index_in_memory_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_number_of_items_to_process_in_single_batch() -> usize {
    128 * 1024
}

fn default_max_map_reduce_index_outputs_per_document() -> i32 {
    50
}

fn default_max_simple_index_outputs_per_document() -> i32 {
    15
}

/// Engine configuration, read from the host's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_flush_index_to_disk_size_mb")]
    pub flush_index_to_disk_size_mb: usize,

    /// The writer is torn down and recreated after this many applies,
    /// bounding the growth of its internal buffers.
    #[serde(default = "default_max_index_writes_before_recreate")]
    pub max_index_writes_before_recreate: usize,

    /// Memory-backed indexes move to disk past this size.
    #[serde(default = "default_new_index_in_memory_max_bytes")]
    pub new_index_in_memory_max_bytes: usize,

    #[serde(default = "default_max_number_of_items_to_process_in_single_batch")]
    pub max_number_of_items_to_process_in_single_batch: usize,

    /// Fan-out cap for reduce indexes. −1 disables the check.
    #[serde(default = "default_max_map_reduce_index_outputs_per_document")]
    pub max_map_reduce_index_outputs_per_document: i32,

    /// Fan-out cap for simple indexes. −1 disables the check.
    #[serde(default = "default_max_simple_index_outputs_per_document")]
    pub max_simple_index_outputs_per_document: i32,

    /// New indexes start memory-backed when set.
    #[serde(default)]
    pub run_in_memory: bool,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        serde_json::from_str("{}").expect("defaults always deserialize")
    }
}

impl EngineConfig {
    pub fn load(config_dir: &Path) -> Result<EngineConfig, FileOperationError> {
        read_json(&config_dir.join(ENGINE_CONFIG_FILE))
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), FileOperationError> {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)?;
        }
        atomic_save_json(&config_dir.join(ENGINE_CONFIG_FILE), self)
    }

    pub fn flush_threshold_bytes(&self) -> usize {
        self.flush_index_to_disk_size_mb * 1024 * 1024
    }

    /// Effective fan-out cap for pagination heuristics: a definition
    /// override wins; −1 disables the check but is clamped to 50 so the
    /// over-fetch loop keeps a usable estimate.
    pub fn max_outputs_per_document(&self, is_map_reduce: bool, override_value: Option<i32>) -> usize {
        let configured = override_value.unwrap_or(if is_map_reduce {
            self.max_map_reduce_index_outputs_per_document
        } else {
            self.max_simple_index_outputs_per_document
        });
        if configured < 0 {
            50
        } else {
            configured.max(1) as usize
        }
    }
}
