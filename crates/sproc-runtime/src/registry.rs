//! 过程绑定注册表。

use std::{collections::HashMap, fmt, sync::Arc};

use sproc_core::{
    ProcedureBinding, ProcedureConfig, SprocError, StrategyRegistry,
    configuration::DEFAULT_TIMEOUT,
};
use tracing::info;

use crate::timeouts::TimeoutTable;

/// 按名称索引的过程绑定，外加共享的超时表。
///
/// # 教案式说明
/// - **意图 (Why)**：绑定在启动时一次性装载并校验，调用路径只做只读查找；
///   超时是唯一允许在运行期变化的属性，单独放在 [`TimeoutTable`] 中；
/// - **契约 (What)**：未登记的过程返回 [`SprocError::UnknownProcedure`]；
///   超时表的初始内容取自各绑定的声明值。
pub struct ProcedureRegistry {
    bindings: HashMap<String, Arc<ProcedureBinding>>,
    timeouts: Arc<TimeoutTable>,
}

impl ProcedureRegistry {
    /// 从解析后的配置文档装载。
    pub fn from_config(
        config: &ProcedureConfig,
        strategies: &StrategyRegistry,
    ) -> Result<Self, SprocError> {
        let bindings = config.into_bindings(strategies)?;
        let default = std::time::Duration::from_millis(config.defaults.timeout_ms);
        let registry = Self::build(bindings, default);
        info!(
            procedures = registry.bindings.len(),
            "procedure registry loaded"
        );
        Ok(registry)
    }

    /// 解析 TOML 文本并装载。
    pub fn from_toml_str(text: &str, strategies: &StrategyRegistry) -> Result<Self, SprocError> {
        let config = ProcedureConfig::from_toml_str(text)?;
        Self::from_config(&config, strategies)
    }

    /// 直接由绑定构造，未登记过程使用 [`DEFAULT_TIMEOUT`]。
    pub fn from_bindings(bindings: impl IntoIterator<Item = ProcedureBinding>) -> Self {
        Self::build(bindings.into_iter().collect(), DEFAULT_TIMEOUT)
    }

    fn build(bindings: Vec<ProcedureBinding>, default: std::time::Duration) -> Self {
        let timeouts = bindings
            .iter()
            .map(|binding| (binding.name().to_owned(), binding.timeout()))
            .collect();
        let bindings = bindings
            .into_iter()
            .map(|binding| (binding.name().to_owned(), Arc::new(binding)))
            .collect();
        Self {
            bindings,
            timeouts: Arc::new(TimeoutTable::with_entries(default, timeouts)),
        }
    }

    pub fn binding(&self, procedure: &str) -> Result<Arc<ProcedureBinding>, SprocError> {
        self.bindings
            .get(procedure)
            .cloned()
            .ok_or_else(|| SprocError::UnknownProcedure(procedure.to_owned()))
    }

    pub fn timeouts(&self) -> &Arc<TimeoutTable> {
        &self.timeouts
    }

    /// 用新配置文档中的超时整表替换当前超时，其余绑定属性不变。
    ///
    /// 新文档中未出现的过程回落到默认超时；解析失败时当前超时保持不变。
    pub fn reload_timeouts(&self, text: &str) -> Result<u64, SprocError> {
        let config = ProcedureConfig::from_toml_str(text)?;
        let entries = config.timeouts()?;
        let changed = entries.len();
        self.timeouts.replace(entries);
        let revision = self.timeouts.revision();
        info!(procedures = changed, revision, "procedure timeouts reloaded");
        Ok(revision)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &names)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const DOCUMENT: &str = r#"
        [[procedure]]
        name = "get_simple_int"
        returns = "scalar"
        null_call = "defaults"
        timeout_ms = 250
    "#;

    #[test]
    fn bindings_and_timeouts_come_from_the_document() {
        let registry =
            ProcedureRegistry::from_toml_str(DOCUMENT, &StrategyRegistry::with_defaults()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.timeouts().timeout_for("get_simple_int"),
            Duration::from_millis(250)
        );
        assert!(matches!(
            registry.binding("missing"),
            Err(SprocError::UnknownProcedure(name)) if name == "missing"
        ));
    }

    #[test]
    fn failed_reload_keeps_current_timeouts() {
        let registry =
            ProcedureRegistry::from_toml_str(DOCUMENT, &StrategyRegistry::with_defaults()).unwrap();
        assert!(registry.reload_timeouts("not = [valid").is_err());
        assert_eq!(
            registry.timeouts().timeout_for("get_simple_int"),
            Duration::from_millis(250)
        );
        assert_eq!(registry.timeouts().revision(), 0);
    }
}
