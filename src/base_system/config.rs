//! 配置文件读写：缺失时写出带注释的默认配置，缺字段时与默认值合并后回写。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

/// 单个配置项的说明，用于生成注释。
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];

    /// 反序列化后的取值校验，默认不做限制。
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

pub fn load_or_create<T: ConfigSpec>(config_path: Option<&Path>) -> Result<T, ConfigError> {
    load_or_create_with_base::<T>(config_path, None)
}

/// 读取配置；文件不存在时创建。
///
/// 路径解析顺序：显式 `config_path` > `base_dir/FILE_NAME` > 当前目录下的 `FILE_NAME`。
pub fn load_or_create_with_base<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = resolve_path::<T>(config_path, base_dir);
    ensure_parent(&path)?;

    if !path.exists() {
        let config = T::default();
        write_with_comments(&config, &path)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let (config, incomplete) = parse_with_defaults::<T>(&raw).map_err(|err| match err {
        ParseFailure::Yaml(source) => ConfigError::Parse {
            path: path.clone(),
            source,
        },
        ParseFailure::Other(e) => e,
    })?;
    config.validate()?;

    if incomplete {
        write_with_comments(&config, &path)?;
    }
    Ok(config)
}

enum ParseFailure {
    Yaml(serde_yaml::Error),
    Other(ConfigError),
}

/// 把用户 YAML 叠加到默认值上；第二个返回值表示用户文件是否缺少字段。
fn parse_with_defaults<T: ConfigSpec>(raw: &str) -> Result<(T, bool), ParseFailure> {
    let user: Value = serde_yaml::from_str(raw).map_err(ParseFailure::Yaml)?;
    // 空文件解析为 Null，按全部缺失处理
    let user = match user {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    };

    let incomplete = match &user {
        Value::Mapping(map) => T::fields()
            .iter()
            .any(|f| !map.contains_key(Value::String(f.name.to_string()))),
        _ => true,
    };

    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|e| ParseFailure::Other(ConfigError::Validation(e.to_string())))?;
    overlay(&mut merged, user);

    let config = serde_yaml::from_value(merged)
        .map_err(|e| ParseFailure::Other(ConfigError::Validation(e.to_string())))?;
    Ok((config, incomplete))
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml = generate_yaml_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn generate_yaml_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(mapping) =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?
    else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut out = String::new();
    for field in T::fields() {
        for line in field.description.lines().filter(|l| !l.is_empty()) {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let entry = serde_yaml::to_string(&Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        out.push_str(entry.trim_end());
        out.push('\n');
    }
    Ok(out)
}

/// 递归覆盖：映射按键合并，其余类型直接以用户值为准。
fn overlay(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, val) in src {
                match dest.get_mut(&key) {
                    Some(slot) => overlay(slot, val),
                    None => {
                        dest.insert(key, val);
                    }
                }
            }
        }
        (slot, val) => *slot = val,
    }
}

fn resolve_path<T: ConfigSpec>(path: Option<&Path>, base_dir: Option<&Path>) -> PathBuf {
    match (path, base_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(base)) => base.join(T::FILE_NAME),
        (None, None) => PathBuf::from(T::FILE_NAME),
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        workers: usize,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "demo".to_string(),
                workers: 3,
            }
        }
    }

    impl ConfigSpec for Sample {
        const FILE_NAME: &'static str = "sample.yml";

        fn fields() -> &'static [FieldMeta] {
            static FIELDS: [FieldMeta; 2] = [
                FieldMeta {
                    name: "name",
                    description: "名称",
                },
                FieldMeta {
                    name: "workers",
                    description: "线程数",
                },
            ];
            &FIELDS
        }
    }

    #[test]
    fn creates_commented_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: Sample = load_or_create_with_base(None, Some(dir.path())).unwrap();
        assert_eq!(cfg, Sample::default());

        let written = fs::read_to_string(dir.path().join("sample.yml")).unwrap();
        assert!(written.contains("# 名称"));
        assert!(written.contains("workers: 3"));
    }

    #[test]
    fn merges_partial_file_and_rewrites_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yml");
        fs::write(&path, "workers: 7\n").unwrap();

        let cfg: Sample = load_or_create(Some(&path)).unwrap();
        assert_eq!(cfg.workers, 7);
        assert_eq!(cfg.name, "demo");

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("name: demo"));
        assert!(rewritten.contains("workers: 7"));
    }

    #[test]
    fn rejects_broken_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "workers: [1, 2\n").unwrap();

        let err = load_or_create::<Sample>(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
