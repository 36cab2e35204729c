use anyhow::Result;
use std::env;
use std::path::PathBuf;

use xentbench::judge::download;

/// Central configuration loaded from environment variables.
///
/// Player API keys are read lazily by the player back-end layer (only
/// when a configured player actually needs them); the runtime itself
/// requires none. The .env file is loaded automatically at startup via
/// dotenvy.
pub struct Config {
    pub results_dir: PathBuf,
    pub model_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables. Everything has a
    /// default: results go to ./results, the judge model lives in the
    /// platform data directory.
    pub fn load() -> Result<Self> {
        Ok(Self {
            results_dir: env::var("XENTBENCH_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./results")),
            model_dir: env::var("XENTBENCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| download::default_model_dir()),
        })
    }

    /// Check that the judge model files are present.
    /// Call this before any operation that needs scoring.
    pub fn require_judge_model(&self) -> Result<()> {
        if !download::model_files_present(&self.model_dir) {
            anyhow::bail!(
                "Judge model not found in {}.\n\
                 Run `xentbench download-judge` to download it.",
                self.model_dir.display()
            );
        }
        Ok(())
    }
}
