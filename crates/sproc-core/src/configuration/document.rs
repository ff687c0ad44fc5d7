//! 过程绑定的 TOML 文档。
//!
//! ```toml
//! [defaults]
//! timeout_ms = 30000
//! shard_strategy = "none"
//!
//! [[procedure]]
//! name = "create_or_update_object"
//! returns = "scalar"
//! timeout_ms = 3000
//! shard_strategy = "md5-string"
//! shard_key = [0]
//! null_call = "skip"
//! validate_input = true
//! sensitive = ["password"]
//! ```

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde::Deserialize;

use super::{DEFAULT_TIMEOUT, ProcedureBinding, ReturnShape, ShardScope, ValidationMode};
use crate::{error::ConfigurationError, marshal::NullCallBehavior, shard::StrategyRegistry};

/// 整个配置文档。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "procedure")]
    pub procedures: Vec<ProcedureEntry>,
}

/// 文档级默认值。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_strategy")]
    pub shard_strategy: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            shard_strategy: default_strategy(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_strategy() -> String {
    "none".to_owned()
}

/// 空对象行为的配置写法。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullCallSetting {
    Skip,
    Defaults,
}

impl From<NullCallSetting> for NullCallBehavior {
    fn from(setting: NullCallSetting) -> Self {
        match setting {
            NullCallSetting::Skip => NullCallBehavior::Skip,
            NullCallSetting::Defaults => NullCallBehavior::CallWithDefaults,
        }
    }
}

/// 单个 `[[procedure]]` 条目。
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureEntry {
    pub name: String,
    pub returns: ReturnShape,
    pub null_call: NullCallSetting,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub shard_strategy: Option<String>,
    #[serde(default)]
    pub shard_key: Vec<usize>,
    #[serde(default)]
    pub validate_input: bool,
    #[serde(default)]
    pub validate_output: bool,
    #[serde(default)]
    pub sensitive: Vec<String>,
    #[serde(default)]
    pub parameters: Option<Vec<String>>,
    #[serde(default)]
    pub scope: ShardScope,
}

impl ProcedureConfig {
    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(text)?)
    }

    /// 各过程生效的超时（含默认值），用于构建或热替换超时表。
    pub fn timeouts(&self) -> Result<HashMap<String, Duration>, ConfigurationError> {
        self.procedures
            .iter()
            .map(|entry| Ok((entry.name.clone(), self.timeout_of(entry)?)))
            .collect()
    }

    /// 把条目解析为绑定：策略名称在此一次性解析。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：重复的过程名返回 `DuplicateProcedure`，零超时返回 `ZeroTimeout`，
    ///   未注册的策略返回 `UnknownStrategy`；任一失败都不会产生部分结果。
    pub fn into_bindings(
        &self,
        strategies: &StrategyRegistry,
    ) -> Result<Vec<ProcedureBinding>, ConfigurationError> {
        let mut seen = HashSet::new();
        let mut bindings = Vec::with_capacity(self.procedures.len());

        for entry in &self.procedures {
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigurationError::DuplicateProcedure(entry.name.clone()));
            }
            let strategy_name = entry
                .shard_strategy
                .as_deref()
                .unwrap_or(&self.defaults.shard_strategy);
            let strategy = strategies.get(strategy_name).ok_or_else(|| {
                ConfigurationError::UnknownStrategy {
                    procedure: entry.name.clone(),
                    strategy: strategy_name.to_owned(),
                }
            })?;

            let mut binding =
                ProcedureBinding::new(entry.name.clone(), entry.returns, entry.null_call.into())
                    .with_timeout(self.timeout_of(entry)?)
                    .with_strategy(strategy)
                    .with_shard_key(entry.shard_key.iter().copied())
                    .with_validation(ValidationMode {
                        input: entry.validate_input,
                        output: entry.validate_output,
                    })
                    .with_scope(entry.scope)
                    .with_sensitive(entry.sensitive.iter().cloned());
            if let Some(parameters) = &entry.parameters {
                binding = binding.with_parameters(parameters.iter().cloned());
            }
            bindings.push(binding);
        }
        Ok(bindings)
    }

    fn timeout_of(&self, entry: &ProcedureEntry) -> Result<Duration, ConfigurationError> {
        match entry.timeout_ms.unwrap_or(self.defaults.timeout_ms) {
            0 => Err(ConfigurationError::ZeroTimeout(entry.name.clone())),
            millis => Ok(Duration::from_millis(millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
        [defaults]
        timeout_ms = 1500

        [[procedure]]
        name = "create_or_update_object"
        returns = "scalar"
        shard_strategy = "md5-string"
        shard_key = [0]
        null_call = "skip"
        validate_input = true

        [[procedure]]
        name = "login"
        returns = "scalar"
        null_call = "defaults"
        timeout_ms = 200
        sensitive = ["password"]
        scope = "search"
    "#;

    #[test]
    fn bindings_resolve_strategies_and_defaults() {
        let config = ProcedureConfig::from_toml_str(DOCUMENT).unwrap();
        let bindings = config
            .into_bindings(&StrategyRegistry::with_defaults())
            .unwrap();
        assert_eq!(bindings.len(), 2);

        let create = &bindings[0];
        assert_eq!(create.strategy().name(), "md5-string");
        assert_eq!(create.timeout(), Duration::from_millis(1500));
        assert_eq!(create.null_call(), NullCallBehavior::Skip);
        assert!(create.validation().input);

        let login = &bindings[1];
        assert_eq!(login.strategy().name(), "none");
        assert_eq!(login.timeout(), Duration::from_millis(200));
        assert_eq!(login.null_call(), NullCallBehavior::CallWithDefaults);
        assert_eq!(login.scope(), ShardScope::Search);
        assert!(login.is_sensitive("password"));
    }

    #[test]
    fn unknown_strategy_fails_at_load() {
        let config = ProcedureConfig::from_toml_str(
            r#"
            [[procedure]]
            name = "p"
            returns = "void"
            null_call = "skip"
            shard_strategy = "crc32"
            "#,
        )
        .unwrap();
        let err = config
            .into_bindings(&StrategyRegistry::with_defaults())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnknownStrategy { ref strategy, .. } if strategy == "crc32"
        ));
        assert_eq!(err.code(), "sproc.config.unknown_strategy");
    }

    #[test]
    fn null_call_must_be_declared() {
        let err = ProcedureConfig::from_toml_str(
            r#"
            [[procedure]]
            name = "p"
            returns = "void"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("null_call"), "{err}");
    }

    #[test]
    fn duplicate_and_zero_timeout_are_rejected() {
        let duplicate = ProcedureConfig::from_toml_str(
            r#"
            [[procedure]]
            name = "p"
            returns = "void"
            null_call = "skip"

            [[procedure]]
            name = "p"
            returns = "row"
            null_call = "skip"
            "#,
        )
        .unwrap();
        assert!(matches!(
            duplicate.into_bindings(&StrategyRegistry::with_defaults()),
            Err(ConfigurationError::DuplicateProcedure(name)) if name == "p"
        ));

        let zero = ProcedureConfig::from_toml_str(
            r#"
            [[procedure]]
            name = "p"
            returns = "void"
            null_call = "skip"
            timeout_ms = 0
            "#,
        )
        .unwrap();
        assert!(matches!(
            zero.timeouts(),
            Err(ConfigurationError::ZeroTimeout(_))
        ));
    }
}
