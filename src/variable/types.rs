use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// 变量作用域，共 7 层
///
/// 组合视图按固定优先级做右偏覆盖（低 → 高）：
/// global → collection → environment → folder → request → oauth2 → runtime，
/// 同名变量由更高优先级的作用域遮蔽。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableScope {
    GlobalEnvironment,
    Collection,
    Environment,
    Folder,
    Request,
    Oauth2Credential,
    Runtime,
}

impl VariableScope {
    /// 覆盖顺序（最低优先级在前）
    pub const PRECEDENCE: [VariableScope; 7] = [
        VariableScope::GlobalEnvironment,
        VariableScope::Collection,
        VariableScope::Environment,
        VariableScope::Folder,
        VariableScope::Request,
        VariableScope::Oauth2Credential,
        VariableScope::Runtime,
    ];
}

/// `process.env.*` 的保留前缀，指向独立的进程环境作用域
const PROCESS_ENV_PREFIX: &str = "process.env.";

/// 名称以 `@` 开头的变量只在脚本自身的词法范围内可见，
/// 执行结束后不会回写到 runtime 作用域
pub fn is_local_name(name: &str) -> bool {
    name.starts_with('@')
}

/// 全部变量作用域的容器
///
/// runtime 是脚本默认可写的唯一作用域；其余作用域的写入
/// 必须通过显式返回值（见 ScriptExecutionResult），而非隐式修改。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableSet {
    pub global_environment: HashMap<String, Value>,
    pub collection: HashMap<String, Value>,
    pub environment: HashMap<String, Value>,
    pub folder: HashMap<String, Value>,
    pub request: HashMap<String, Value>,
    pub oauth2_credential: HashMap<String, Value>,
    pub runtime: HashMap<String, Value>,
    /// 进程环境变量，仅能通过 `process.env.NAME` 访问
    pub process_env: HashMap<String, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, scope: VariableScope) -> &HashMap<String, Value> {
        match scope {
            VariableScope::GlobalEnvironment => &self.global_environment,
            VariableScope::Collection => &self.collection,
            VariableScope::Environment => &self.environment,
            VariableScope::Folder => &self.folder,
            VariableScope::Request => &self.request,
            VariableScope::Oauth2Credential => &self.oauth2_credential,
            VariableScope::Runtime => &self.runtime,
        }
    }

    pub fn scope_mut(&mut self, scope: VariableScope) -> &mut HashMap<String, Value> {
        match scope {
            VariableScope::GlobalEnvironment => &mut self.global_environment,
            VariableScope::Collection => &mut self.collection,
            VariableScope::Environment => &mut self.environment,
            VariableScope::Folder => &mut self.folder,
            VariableScope::Request => &mut self.request,
            VariableScope::Oauth2Credential => &mut self.oauth2_credential,
            VariableScope::Runtime => &mut self.runtime,
        }
    }

    pub fn set(&mut self, scope: VariableScope, key: impl Into<String>, value: Value) {
        self.scope_mut(scope).insert(key.into(), value);
    }

    /// 计算组合视图：按优先级做右偏覆盖
    pub fn combined(&self) -> HashMap<String, Value> {
        let mut merged = HashMap::new();
        for scope in VariableScope::PRECEDENCE {
            for (key, value) in self.scope(scope) {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// 按组合视图解析单个名称
    ///
    /// `process.env.NAME` 是保留路径，从独立的进程环境作用域取值
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(env_name) = name.strip_prefix(PROCESS_ENV_PREFIX) {
            return self
                .process_env
                .get(env_name)
                .map(|v| Value::String(v.clone()));
        }

        // 从高到低找第一个定义了该名称的作用域
        for scope in VariableScope::PRECEDENCE.iter().rev() {
            if let Some(value) = self.scope(*scope).get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    /// 清除 runtime 作用域中的 `@` 局部变量
    pub fn strip_locals(&mut self) {
        self.runtime.retain(|name, _| !is_local_name(name));
    }

    /// 将 JSON 值渲染为插值用的字符串
    ///
    /// 字符串不带引号，其余类型使用 JSON 文本表示
    pub fn render_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence_overlay() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::GlobalEnvironment, "x", json!("global"));
        vars.set(VariableScope::Collection, "x", json!("collection"));
        vars.set(VariableScope::Environment, "x", json!("environment"));
        vars.set(VariableScope::Folder, "x", json!("folder"));
        vars.set(VariableScope::Request, "x", json!("request"));
        vars.set(VariableScope::Oauth2Credential, "x", json!("oauth2"));
        vars.set(VariableScope::Runtime, "x", json!("runtime"));

        assert_eq!(vars.lookup("x"), Some(json!("runtime")));
        assert_eq!(vars.combined().get("x"), Some(&json!("runtime")));
    }

    #[test]
    fn test_lower_scope_visible_without_shadow() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::GlobalEnvironment, "only_global", json!(1));
        vars.set(VariableScope::Runtime, "only_runtime", json!(2));

        assert_eq!(vars.lookup("only_global"), Some(json!(1)));
        assert_eq!(vars.lookup("only_runtime"), Some(json!(2)));
        assert_eq!(vars.lookup("missing"), None);
    }

    #[test]
    fn test_oauth2_shadows_request_but_not_runtime() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::Request, "token", json!("req"));
        vars.set(VariableScope::Oauth2Credential, "token", json!("oauth"));
        assert_eq!(vars.lookup("token"), Some(json!("oauth")));

        vars.set(VariableScope::Runtime, "token", json!("rt"));
        assert_eq!(vars.lookup("token"), Some(json!("rt")));
    }

    #[test]
    fn test_process_env_reserved_path() {
        let mut vars = VariableSet::new();
        vars.process_env.insert("HOME".to_string(), "/home/u".to_string());
        // 普通名称不可见
        assert_eq!(vars.lookup("HOME"), None);
        assert_eq!(vars.lookup("process.env.HOME"), Some(json!("/home/u")));
        assert_eq!(vars.lookup("process.env.MISSING"), None);
    }

    #[test]
    fn test_strip_locals() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::Runtime, "@tmp", json!(1));
        vars.set(VariableScope::Runtime, "kept", json!(2));
        vars.strip_locals();

        assert!(!vars.runtime.contains_key("@tmp"));
        assert!(vars.runtime.contains_key("kept"));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(VariableSet::render_value(&json!("plain")), "plain");
        assert_eq!(VariableSet::render_value(&json!(42)), "42");
        assert_eq!(VariableSet::render_value(&json!(true)), "true");
        assert_eq!(
            VariableSet::render_value(&json!({"a": 1})),
            r#"{"a":1}"#
        );
    }
}
