//! guest 能力 shims
//!
//! 能力通过显式的 CapabilitySet 在 VM 构造时注入；
//! 记录里没有的能力在 guest 全局中不存在。

use rand::TryRngCore;
use rand::rngs::OsRng;
use rquickjs::Ctx;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::rc::Rc;

use crate::script::sandbox::throw_message;
use crate::variable::VariableSet;

/// bru.runRequest 的宿主桥：输入相对路径，输出 JSON 信封
/// `{"result": ...}` 或 `{"error": "..."}`
pub type RunRequestFn = Rc<dyn Fn(String) -> Pin<Box<dyn Future<Output = String>>>>;

/// guest console 输出的单条事件
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEvent {
    pub level: String,
    pub args: Vec<serde_json::Value>,
}

/// VM 构造时的能力注入记录
#[derive(Clone, Default)]
pub struct CapabilitySet {
    /// console shim（缓冲转发，不直写终端）
    pub console: bool,
    /// 确定性 sleep(ms)
    pub sleep: bool,
    /// crypto.randomBytes / crypto.getRandomValues
    pub crypto: bool,
    /// TextEncoder / TextDecoder
    pub text_codec: bool,
    /// 受限 require 的根目录；None 则 require 不可用
    pub require_root: Option<PathBuf>,
    /// bru.interpolate 的基础变量视图
    pub interpolate_base: Option<VariableSet>,
    /// bru.runRequest 桥
    pub run_request: Option<RunRequestFn>,
    /// 按值注入的数据全局（请求、响应、状态对象）
    pub globals: Vec<(String, serde_json::Value)>,
}

impl CapabilitySet {
    /// 脚本执行的常规能力组合
    pub fn standard() -> Self {
        Self {
            console: true,
            sleep: true,
            crypto: true,
            text_codec: true,
            ..Self::default()
        }
    }
}

/// 由能力记录拼出 shim prelude
pub fn prelude(caps: &CapabilitySet) -> String {
    let mut source = String::new();

    if caps.console {
        source.push_str(CONSOLE_SHIM);
    }
    if caps.sleep {
        source.push_str(SLEEP_SHIM);
    }
    if caps.crypto {
        source.push_str(CRYPTO_SHIM);
    }
    if caps.text_codec {
        source.push_str(TEXT_CODEC_SHIM);
    }

    source
}

/// console.*：参数按值捕获后交给宿主缓冲
const CONSOLE_SHIM: &str = r#"
(() => {
  const forward = globalThis.__ruquest_console;
  const plain = (v) => {
    if (typeof v === "function") return String(v);
    if (typeof v === "undefined") return null;
    try { return JSON.parse(JSON.stringify(v)); } catch (_) { return String(v); }
  };
  const make = (level) => (...args) => { forward(level, args.map(plain)); };
  globalThis.console = {
    log: make("log"),
    info: make("info"),
    warn: make("warn"),
    error: make("error"),
    debug: make("debug"),
  };
})();
"#;

/// sleep(ms)：完全建立在 guest 自身的微任务队列上，
/// 轮数由 ms 决定（有上界），guest 内的先后顺序可复现
const SLEEP_SHIM: &str = r#"
globalThis.sleep = (ms) => {
  const turns = Math.min(Math.max(Math.floor(Number(ms) || 0), 1), 64);
  let p = Promise.resolve();
  for (let i = 0; i < turns; i++) {
    p = p.then(() => undefined);
  }
  return p;
};
"#;

const CRYPTO_SHIM: &str = r#"
globalThis.crypto = {
  randomBytes: (n) => Uint8Array.from(globalThis.__ruquest_random_bytes(n)),
  getRandomValues: (array) => {
    const bytes = globalThis.__ruquest_random_bytes(array.length);
    for (let i = 0; i < array.length; i++) {
      array[i] = bytes[i];
    }
    return array;
  },
};
"#;

const TEXT_CODEC_SHIM: &str = r#"
globalThis.TextEncoder = class TextEncoder {
  encode(text) {
    return Uint8Array.from(globalThis.__ruquest_utf8_encode(String(text)));
  }
};
globalThis.TextDecoder = class TextDecoder {
  decode(bytes) {
    return globalThis.__ruquest_utf8_decode(Array.from(bytes));
  }
};
"#;

/// 宿主安全随机源
pub fn random_bytes(ctx: &Ctx<'_>, len: usize) -> rquickjs::Result<Vec<u8>> {
    const MAX_RANDOM_BYTES: usize = 65536;
    if len > MAX_RANDOM_BYTES {
        return Err(throw_message(ctx, "randomBytes: requested length too large"));
    }
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| throw_message(ctx, &format!("randomBytes: {}", e)))?;
    Ok(buf)
}

pub fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// 毫秒时间戳 + chrono 格式串 → 文本；非法格式串产出空串而非 panic
pub fn format_timestamp(millis: i64, fmt: &str) -> String {
    let Some(datetime) = chrono::DateTime::from_timestamp_millis(millis) else {
        return String::new();
    };
    let mut out = String::new();
    if write!(out, "{}", datetime.format(fmt)).is_err() {
        return String::new();
    }
    out
}
