use crate::variable::types::VariableSet;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// 变量替换器
pub struct VariableResolver;

impl VariableResolver {
    /// 替换文本中的所有 {{variable}} 占位符
    ///
    /// 名称允许 `.`（process.env 路径）与 `@`（局部变量约定）。
    /// 未定义的变量保持占位符原样，不报错。
    pub fn interpolate(text: &str, vars: &VariableSet) -> String {
        static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = VAR_REGEX.get_or_init(|| {
            Regex::new(r"\{\{\s*([@A-Za-z_][A-Za-z0-9_.@\-]*)\s*\}\}").unwrap()
        });

        re.replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            vars.lookup(name)
                .map(|v| VariableSet::render_value(&v))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
    }

    /// 替换 URL path 中的 `:name` 路径参数
    ///
    /// 只处理完整的路径段；参数值先经过一般字符串插值再代入。
    /// 查询串与片段部分不参与路径参数替换。
    pub fn substitute_path_params(
        url: &str,
        params: &[(String, String)],
        vars: &VariableSet,
    ) -> String {
        if params.is_empty() {
            return url.to_string();
        }

        let (path_part, rest) = match url.find(['?', '#']) {
            Some(pos) => (&url[..pos], &url[pos..]),
            None => (url, ""),
        };

        let substituted = path_part
            .split('/')
            .map(|segment| {
                let Some(name) = segment.strip_prefix(':') else {
                    return segment.to_string();
                };
                match params.iter().find(|(n, _)| n == name) {
                    Some((_, raw)) => Self::interpolate(raw, vars),
                    None => segment.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("/");

        format!("{}{}", substituted, rest)
    }
}
