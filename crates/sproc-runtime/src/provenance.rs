//! 调用来源日志的参数渲染。
//!
//! 渲染结果只用于 `debug!` 日志：空值参数省略，敏感参数（字段标记或过程声明）整项不输出。

use sproc_core::{CallArgs, ProcedureBinding, marshal::CallArg};

/// 把参数表渲染为 `name=value, name=value`。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - 值为 NULL 的参数不出现；
///   - 参数自身标记为敏感，或其全名、最后一段名称出现在过程的 `sensitive` 列表中时，整项不出现；
///   - 位置参数（`$n`）按过程声明的 `parameters` 取回参数名后再判断；过程声明了敏感参数却没有参数名列表时，
///     位置参数一律不输出；
/// - **风险 (Trade-offs)**：按最后一段名称匹配会让 `billing.password` 与 `login.password` 同时被隐藏，宁可多藏。
pub fn render_arguments(args: &CallArgs, binding: &ProcedureBinding) -> String {
    args.iter()
        .filter_map(|arg| {
            logged_name(arg, binding).map(|name| format!("{name}={}", arg.value()))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// 可输出时返回日志中使用的参数名。
fn logged_name<'a>(arg: &'a CallArg, binding: &'a ProcedureBinding) -> Option<&'a str> {
    if arg.value().is_null() || arg.is_sensitive() {
        return None;
    }
    let name = match positional_index(arg.name()) {
        Some(index) => match binding.parameters().and_then(|declared| declared.get(index)) {
            Some(declared) => declared.as_str(),
            None if binding.sensitive().is_empty() => arg.name(),
            None => return None,
        },
        None => arg.name(),
    };
    let leaf = name.rsplit('.').next().unwrap_or(name);
    (!binding.is_sensitive(name) && !binding.is_sensitive(leaf)).then_some(name)
}

/// `$1` → 0。
fn positional_index(name: &str) -> Option<usize> {
    name.strip_prefix('$')?.parse::<usize>().ok()?.checked_sub(1)
}
