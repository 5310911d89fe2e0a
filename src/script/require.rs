//! 受限 require
//!
//! 两类可解析目标：
//! 1. 构造期固定的内置虚拟模块允许名单（不可变）；
//! 2. 集合根目录之下的脚本文件，规范化后做前缀校验，
//!    越出根目录一律显式报错，绝不静默放行。

use rquickjs::{CatchResultExt, Ctx, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::script::sandbox::throw_message;

/// 内置模块名单；名单外的裸模块名一律拒绝
fn builtin_modules() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("assert", ASSERT_MODULE),
        ("hash", HASH_MODULE),
        ("dates", DATES_MODULE),
        ("codec", CODEC_MODULE),
        ("httpstub", HTTPSTUB_MODULE),
    ])
}

const ASSERT_MODULE: &str = r#"
const fail = (message) => { throw new Error(message); };
module.exports = {
  ok: (v, m) => { if (!v) fail(m ?? "expected value to be truthy"); },
  equal: (a, b, m) => { if (a !== b) fail(m ?? `expected ${JSON.stringify(a)} to equal ${JSON.stringify(b)}`); },
  notEqual: (a, b, m) => { if (a === b) fail(m ?? `expected values to differ`); },
  deepEqual: (a, b, m) => {
    if (JSON.stringify(a) !== JSON.stringify(b)) fail(m ?? `expected deep equality`);
  },
  fail,
};
"#;

const HASH_MODULE: &str = r#"
module.exports = {
  sha256: (text) => globalThis.__ruquest_sha256(String(text)),
};
"#;

const DATES_MODULE: &str = r#"
module.exports = {
  now: () => Date.now(),
  format: (millis, fmt) => globalThis.__ruquest_format_date(Number(millis), String(fmt)),
  iso: (millis) => globalThis.__ruquest_format_date(Number(millis), "%Y-%m-%dT%H:%M:%S%.3fZ"),
};
"#;

const CODEC_MODULE: &str = r#"
const bytesOf = (v) => (typeof v === "string" ? globalThis.__ruquest_utf8_encode(v) : Array.from(v));
const HEX = "0123456789abcdef";
module.exports = {
  hexEncode: (v) => bytesOf(v).map((b) => HEX[b >> 4] + HEX[b & 15]).join(""),
  utf8Encode: (s) => Uint8Array.from(globalThis.__ruquest_utf8_encode(String(s))),
  utf8Decode: (bytes) => globalThis.__ruquest_utf8_decode(Array.from(bytes)),
};
"#;

/// HTTP 客户端桩：沙箱内不提供真实网络能力
const HTTPSTUB_MODULE: &str = r#"
const unavailable = (name) => () =>
  Promise.reject(new Error(`${name} is not available inside the script sandbox`));
module.exports = {
  get: unavailable("http.get"),
  post: unavailable("http.post"),
  put: unavailable("http.put"),
  delete: unavailable("http.delete"),
  request: unavailable("http.request"),
};
"#;

/// 模块注册表：构造后不可变
pub struct ModuleRegistry {
    builtins: HashMap<&'static str, &'static str>,
    /// 规范化后的集合根目录；目录不可达时文件 require 整体关闭
    root: Option<PathBuf>,
}

impl ModuleRegistry {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            builtins: builtin_modules(),
            root: root.canonicalize().ok(),
        })
    }

    /// 解析并执行模块，返回其 exports
    pub fn load<'js>(&self, ctx: Ctx<'js>, spec: String) -> rquickjs::Result<Value<'js>> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(throw_message(&ctx, "require: empty module specifier"));
        }

        let source = if let Some(source) = self.builtins.get(spec) {
            (*source).to_string()
        } else if spec.starts_with('.') || spec.starts_with('/') {
            self.read_confined_file(&ctx, spec)?
        } else {
            return Err(throw_message(
                &ctx,
                &format!("require: module '{}' is not in the allow-list", spec),
            ));
        };

        // CommonJS 包装，exports 即求值结果
        let wrapped = format!(
            "(function() {{ const module = {{ exports: {{}} }}; const exports = module.exports;\n{}\n;return module.exports; }})()",
            source
        );
        ctx.eval::<Value, _>(wrapped.into_bytes())
            .catch(&ctx)
            .map_err(|e| throw_message(&ctx, &format!("require('{}'): {}", spec, e)))
    }

    /// 读取根目录下的模块文件
    ///
    /// 候选路径规范化后必须仍以根目录为前缀，否则视为逃逸。
    fn read_confined_file(&self, ctx: &Ctx<'_>, spec: &str) -> rquickjs::Result<String> {
        let Some(root) = &self.root else {
            return Err(throw_message(
                ctx,
                "require: collection root is unavailable, file modules are disabled",
            ));
        };
        let relative = spec.trim_start_matches('/');
        let candidate = root.join(relative);

        let resolved = candidate.canonicalize().map_err(|_| {
            throw_message(
                ctx,
                &format!("require: module file '{}' not found under collection root", spec),
            )
        })?;

        if !resolved.starts_with(root) {
            return Err(throw_message(
                ctx,
                &format!(
                    "require: path '{}' escapes the collection root and was refused",
                    spec
                ),
            ));
        }

        std::fs::read_to_string(&resolved)
            .map_err(|e| throw_message(ctx, &format!("require: failed to read '{}': {}", spec, e)))
    }
}
