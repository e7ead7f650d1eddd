use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 编辑器配置的根结构。
#[derive(Debug, Clone, Deserialize)]
pub struct EditorConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            history: HistoryConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

impl EditorConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `FBE_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("FBE_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置。`level` 由嵌入方在安装 tracing 订阅器时读取，
/// 引擎本身只发事件、不装订阅器。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 撤销历史配置。`max_entries` 为 0 表示不限容量。
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "HistoryConfig::default_max_entries")]
    pub max_entries: usize,
}

impl HistoryConfig {
    fn default_max_entries() -> usize {
        1024
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::default_max_entries(),
        }
    }
}

/// 布线生成器配置。`search_budget` 限制一次规划的搜索步数。
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "LayoutConfig::default_search_budget")]
    pub search_budget: usize,
}

impl LayoutConfig {
    fn default_search_budget() -> usize {
        65_536
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            search_budget: Self::default_search_budget(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = EditorConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.history.max_entries, 1024);
        assert_eq!(cfg.layout.search_budget, 65_536);
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [history]
            max_entries = 32

            [layout]
            search_budget = 512
            "#
        )
        .unwrap();

        let cfg = EditorConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.history.max_entries, 32);
        assert_eq!(cfg.layout.search_budget, 512);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [history]
            max_entries = 0
            "#
        )
        .unwrap();

        let cfg = EditorConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.history.max_entries, 0);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.layout.search_budget, 65_536);
    }
}
