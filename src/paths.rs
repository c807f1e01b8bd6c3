//! XDG-compliant path resolution for akh-reflect.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(akh::paths::no_home),
        help("Set the HOME environment variable or pass --data-dir / --config explicitly.")
    )]
    NoHome,
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG directories for akh-reflect.
#[derive(Debug, Clone)]
pub struct ReflectPaths {
    /// `$XDG_CONFIG_HOME/akh-reflect/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/akh-reflect/`
    pub data_dir: PathBuf,
}

impl ReflectPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    fn resolve_with(lookup: impl Fn(&str) -> Option<String>) -> PathResult<Self> {
        let home = lookup("HOME").map(PathBuf::from).ok_or(PathError::NoHome)?;

        let config_dir = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"))
            .join("akh-reflect");

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".local/share"))
            .join("akh-reflect");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// `config_dir/config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default redb directory for one bank set.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}
