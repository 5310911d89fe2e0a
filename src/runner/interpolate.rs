//! 请求插值（INTERPOLATE 阶段）
//!
//! 按内容类型分路处理：JSON 以转义字符串方式代入再重新解析，
//! 替换后不合法的 JSON 容忍原样发送；表单与 multipart 逐字段
//! 插值；`:name` 路径参数放在一般字符串插值之后处理。

use serde_json::Value;
use std::path::Path;

use crate::collection::{AuthConfig, ParamKind, RequestBody, RequestDefinition};
use crate::http::{InterpolatedRequest, Url};
use crate::variable::{VariableResolver, VariableSet};
use crate::{Result, RuquestError};

/// 将合并后的请求定义插值为可发送请求
pub fn interpolate_request(
    def: &RequestDefinition,
    collection_path: &Path,
    vars: &VariableSet,
) -> Result<InterpolatedRequest> {

    // URL：先一般插值，再查询参数，最后路径参数
    let mut url = VariableResolver::interpolate(&def.url, vars);

    let query: Vec<(String, String)> = def
        .params
        .iter()
        .filter(|p| p.enabled && p.kind == ParamKind::Query)
        .map(|p| {
            (
                VariableResolver::interpolate(&p.name, vars),
                VariableResolver::interpolate(&p.value, vars),
            )
        })
        .collect();
    if !query.is_empty() {
        let joined = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        url = if url.contains('?') {
            format!("{}&{}", url, joined)
        } else {
            format!("{}?{}", url, joined)
        };
    }

    let path_params: Vec<(String, String)> = def
        .params
        .iter()
        .filter(|p| p.enabled && p.kind == ParamKind::Path)
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    url = VariableResolver::substitute_path_params(&url, &path_params, vars);

    // 规范化（默认 scheme / host），同时校验
    let url = Url::parse(&url)?.to_string();

    let mut request = InterpolatedRequest::new(&def.method, &url)?;

    for header in def.headers.iter().filter(|h| h.enabled) {
        let name = VariableResolver::interpolate(&header.name, vars);
        let value = VariableResolver::interpolate(&header.value, vars);
        request = request.with_header(&name, &value)?;
    }

    request = apply_body(request, &def.body, vars, collection_path)?;
    request = apply_auth(request, &def.auth, vars)?;

    Ok(request)
}

fn apply_body(
    mut request: InterpolatedRequest,
    body: &RequestBody,
    vars: &VariableSet,
    collection_path: &Path,
) -> Result<InterpolatedRequest> {
    match body {
        RequestBody::None => Ok(request),

        RequestBody::Json { content } => {
            if !request.has_header("content-type") {
                request = request.with_header("Content-Type", "application/json")?;
            }
            Ok(request.with_text(&interpolate_json(content, vars)))
        }

        RequestBody::Text { content } => {
            if !request.has_header("content-type") {
                request = request.with_header("Content-Type", "text/plain")?;
            }
            Ok(request.with_text(&VariableResolver::interpolate(content, vars)))
        }

        RequestBody::Xml { content } => {
            if !request.has_header("content-type") {
                request = request.with_header("Content-Type", "application/xml")?;
            }
            Ok(request.with_text(&VariableResolver::interpolate(content, vars)))
        }

        RequestBody::Sparql { content } => {
            if !request.has_header("content-type") {
                request = request.with_header("Content-Type", "application/sparql-query")?;
            }
            Ok(request.with_text(&VariableResolver::interpolate(content, vars)))
        }

        RequestBody::FormUrlEncoded { fields } => {
            let fields = interpolate_fields(fields, vars);
            Ok(request.with_form(fields))
        }

        RequestBody::MultipartForm { fields } => {
            let fields = interpolate_fields(fields, vars);
            Ok(request.with_multipart(fields))
        }

        RequestBody::Graphql { query, variables } => {
            if !request.has_header("content-type") {
                request = request.with_header("Content-Type", "application/json")?;
            }
            let query = VariableResolver::interpolate(query, vars);
            let rendered_vars = VariableResolver::interpolate(variables, vars);
            let variables: Value = if rendered_vars.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&rendered_vars)
                    .unwrap_or(Value::String(rendered_vars))
            };
            let payload = serde_json::json!({ "query": query, "variables": variables });
            Ok(request.with_text(&payload.to_string()))
        }

        RequestBody::File { path } => {
            // 文件体限制在集合根目录之下
            let candidate = if path.is_absolute() {
                path.clone()
            } else {
                collection_path.join(path)
            };
            let root = collection_path.canonicalize().map_err(|e| {
                RuquestError::ValidationError(format!(
                    "Collection root {} is not accessible: {}",
                    collection_path.display(),
                    e
                ))
            })?;
            let resolved = candidate.canonicalize().map_err(|_| {
                RuquestError::ValidationError(format!(
                    "Body file {} not found",
                    candidate.display()
                ))
            })?;
            if !resolved.starts_with(&root) {
                return Err(RuquestError::ValidationError(format!(
                    "Body file {} escapes the collection root",
                    path.display()
                )));
            }
            let content = std::fs::read_to_string(&resolved)?;
            Ok(request.with_text(&content))
        }
    }
}

fn interpolate_fields(
    fields: &[crate::collection::VarAssignment],
    vars: &VariableSet,
) -> Vec<(String, String)> {
    fields
        .iter()
        .filter(|f| f.enabled)
        .map(|f| {
            (
                VariableResolver::interpolate(&f.name, vars),
                VariableResolver::interpolate(&f.value, vars),
            )
        })
        .collect()
}

fn apply_auth(
    request: InterpolatedRequest,
    auth: &AuthConfig,
    vars: &VariableSet,
) -> Result<InterpolatedRequest> {
    match auth {
        AuthConfig::None | AuthConfig::Inherit => Ok(request),
        AuthConfig::Basic { username, password } => {
            let username = VariableResolver::interpolate(username, vars);
            let password = VariableResolver::interpolate(password, vars);
            request.with_auth_basic(&username, &password)
        }
        AuthConfig::Bearer { token } => {
            let token = VariableResolver::interpolate(token, vars);
            request.with_auth_bearer(&token)
        }
    }
}

/// JSON 体插值
///
/// 替换值以 JSON 转义形式代入，替换完成后重新解析做规范化；
/// 解析失败（替换产生了非法 JSON）保留插值文本，不视为错误。
pub fn interpolate_json(content: &str, vars: &VariableSet) -> String {
    static VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{\{\s*([@A-Za-z_][A-Za-z0-9_.@\-]*)\s*\}\}").unwrap()
    });

    let interpolated = re
        .replace_all(content, |caps: &regex::Captures| {
            let name = &caps[1];
            match vars.lookup(name) {
                Some(Value::String(s)) => {
                    // 字符串按转义后的内容代入（不带外围引号）
                    let quoted = serde_json::to_string(&s).unwrap_or_default();
                    quoted[1..quoted.len() - 1].to_string()
                }
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .to_string();

    match serde_json::from_str::<Value>(&interpolated) {
        Ok(value) => value.to_string(),
        Err(_) => interpolated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{HeaderEntry, ParamEntry, VarAssignment};
    use crate::variable::VariableScope;
    use serde_json::json;

    fn vars_with(entries: &[(&str, Value)]) -> VariableSet {
        let mut vars = VariableSet::new();
        for (k, v) in entries {
            vars.set(VariableScope::Environment, k.to_string(), v.clone());
        }
        vars
    }

    fn interpolate(def: &RequestDefinition, vars: &VariableSet) -> Result<InterpolatedRequest> {
        interpolate_request(def, &std::env::temp_dir(), vars)
    }

    #[test]
    fn test_url_and_header_interpolation() {
        let vars = vars_with(&[("host", json!("example.com")), ("token", json!("t0k"))]);
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "https://{{host}}/api".to_string(),
            headers: vec![HeaderEntry::new("X-Token", "{{token}}")],
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &vars).unwrap();
        assert_eq!(request.url, "https://example.com:443/api");
        assert_eq!(
            request.headers.get("X-Token").unwrap().to_str().unwrap(),
            "t0k"
        );
    }

    #[test]
    fn test_undefined_variable_left_in_url() {
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "http://example.com/{{missing}}".to_string(),
            ..RequestDefinition::default()
        };
        let request = interpolate(&def, &VariableSet::new()).unwrap();
        assert!(request.url.contains("%7B%7Bmissing%7D%7D") || request.url.contains("{{missing}}"));
    }

    #[test]
    fn test_query_params_appended() {
        let vars = vars_with(&[("page", json!(2))]);
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "http://example.com/list".to_string(),
            params: vec![ParamEntry {
                name: "page".to_string(),
                value: "{{page}}".to_string(),
                kind: ParamKind::Query,
                enabled: true,
            }],
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &vars).unwrap();
        assert!(request.url.ends_with("/list?page=2"));
    }

    #[test]
    fn test_path_params_substituted_last() {
        let vars = vars_with(&[("uid", json!("42"))]);
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "http://example.com/users/:id".to_string(),
            params: vec![ParamEntry {
                name: "id".to_string(),
                value: "{{uid}}".to_string(),
                kind: ParamKind::Path,
                enabled: true,
            }],
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &vars).unwrap();
        assert!(request.url.ends_with("/users/42"));
    }

    #[test]
    fn test_json_body_string_values_escaped() {
        let vars = vars_with(&[("name", json!("say \"hi\""))]);
        let rendered = interpolate_json(r#"{"greeting": "{{name}}"}"#, &vars);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["greeting"], "say \"hi\"");
    }

    #[test]
    fn test_json_body_number_inserted_raw() {
        let vars = vars_with(&[("count", json!(3))]);
        let rendered = interpolate_json(r#"{"count": {{count}}}"#, &vars);
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["count"], 3);
    }

    #[test]
    fn test_malformed_json_after_substitution_tolerated() {
        let vars = VariableSet::new();
        let rendered = interpolate_json(r#"{"a": {{missing}}}"#, &vars);
        // 解析失败时保留插值文本，不报错
        assert_eq!(rendered, r#"{"a": {{missing}}}"#);
    }

    #[test]
    fn test_form_fields_interpolated_individually() {
        let vars = vars_with(&[("user", json!("u1"))]);
        let def = RequestDefinition {
            method: "POST".to_string(),
            url: "http://example.com/login".to_string(),
            body: RequestBody::FormUrlEncoded {
                fields: vec![
                    VarAssignment::new("username", "{{user}}"),
                    VarAssignment {
                        name: "debug".to_string(),
                        value: "1".to_string(),
                        enabled: false,
                    },
                ],
            },
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &vars).unwrap();
        match request.body.unwrap() {
            crate::http::BodyPayload::Form(fields) => {
                assert_eq!(fields, vec![("username".to_string(), "u1".to_string())]);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_basic_auth_interpolated_and_encoded() {
        let vars = vars_with(&[("user", json!("u")), ("pass", json!("p"))]);
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            auth: AuthConfig::Basic {
                username: "{{user}}".to_string(),
                password: "{{pass}}".to_string(),
            },
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &vars).unwrap();
        assert_eq!(
            request.headers.get("Authorization").unwrap().to_str().unwrap(),
            "Basic dTpw"
        );
    }

    #[test]
    fn test_json_content_type_defaulted_not_overridden() {
        let def = RequestDefinition {
            method: "POST".to_string(),
            url: "http://example.com/".to_string(),
            headers: vec![HeaderEntry::new("Content-Type", "application/vnd.api+json")],
            body: RequestBody::Json {
                content: "{}".to_string(),
            },
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &VariableSet::new()).unwrap();
        assert_eq!(
            request.headers.get("Content-Type").unwrap().to_str().unwrap(),
            "application/vnd.api+json"
        );
    }

    #[test]
    fn test_graphql_body_wrapped() {
        let def = RequestDefinition {
            method: "POST".to_string(),
            url: "http://example.com/graphql".to_string(),
            body: RequestBody::Graphql {
                query: "query { me { id } }".to_string(),
                variables: r#"{"limit": 5}"#.to_string(),
            },
            ..RequestDefinition::default()
        };

        let request = interpolate(&def, &VariableSet::new()).unwrap();
        match request.body.unwrap() {
            crate::http::BodyPayload::Text(text) => {
                let parsed: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(parsed["query"], "query { me { id } }");
                assert_eq!(parsed["variables"]["limit"], 5);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }
}
