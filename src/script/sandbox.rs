//! QuickJS 沙箱
//!
//! 每次脚本调用都新建一对 AsyncRuntime/AsyncContext，执行完即弃，
//! 请求之间不共享任何 guest 状态。宿主注入的函数随 context 一起
//! 在 drop 时统一释放，错误路径也不例外。
//!
//! 异步桥接：guest 脚本包装成 async IIFE，求值得到 promise 句柄，
//! 宿主在「检查 settle 状态 → 泵一轮 job 队列」的循环中推进执行，
//! 状态机为 Pending | Settled(value) | Errored(message)。

use rquickjs::function::{Async, Func};
use rquickjs::promise::PromiseState;
use rquickjs::{
    AsyncContext, AsyncRuntime, CatchResultExt, Ctx, Exception, IntoJs, Object, Persistent,
    Promise, Value,
};
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::script::require::ModuleRegistry;
use crate::script::shims::{self, CapabilitySet, ConsoleEvent};
use crate::variable::{VariableResolver, VariableSet};
use crate::{Result, RuquestError};

/// 沙箱资源与超时配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxOptions {
    /// guest 堆内存上限（字节）
    pub memory_limit: Option<usize>,
    /// guest 栈上限（字节）
    pub max_stack_size: Option<usize>,
    /// 脚本墙钟超时；None 表示不设上限
    pub script_timeout: Option<Duration>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            memory_limit: Some(64 * 1024 * 1024),
            max_stack_size: Some(1024 * 1024),
            script_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// promise 泵的判定结果
enum PumpState {
    Pending,
    Settled(serde_json::Value),
    Errored(String),
}

pub struct Sandbox {
    runtime: AsyncRuntime,
    context: AsyncContext,
    options: SandboxOptions,
    console: Rc<RefCell<Vec<ConsoleEvent>>>,
    /// 在途宿主调用数；用于区分「脚本挂起」与「等待宿主完成」
    pending_hostcalls: Rc<Cell<u32>>,
}

#[allow(clippy::future_not_send)]
impl Sandbox {
    pub async fn new(options: SandboxOptions) -> Result<Self> {
        let runtime = AsyncRuntime::new()
            .map_err(|e| RuquestError::SandboxError(format!("Failed to create runtime: {}", e)))?;

        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit).await;
        }
        if let Some(limit) = options.max_stack_size {
            runtime.set_max_stack_size(limit).await;
        }

        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| RuquestError::SandboxError(format!("Failed to create context: {}", e)))?;

        Ok(Self {
            runtime,
            context,
            options,
            console: Rc::new(RefCell::new(Vec::new())),
            pending_hostcalls: Rc::new(Cell::new(0)),
        })
    }

    /// 按能力记录注入 shims
    ///
    /// 只有记录中显式存在的能力才会出现在 guest 全局里，
    /// 宿主侧不做任何隐式全局修改。
    pub async fn install(&self, caps: &CapabilitySet) -> Result<()> {
        let console = self.console.clone();
        let pending = self.pending_hostcalls.clone();
        let caps_globals = caps.globals.clone();
        let registry = caps
            .require_root
            .as_ref()
            .map(|root| ModuleRegistry::new(root))
            .transpose()?;
        let interpolate_base = caps.interpolate_base.clone();
        let run_request = caps.run_request.clone();

        let console_enabled = caps.console;
        let crypto_enabled = caps.crypto;
        let codec_enabled = caps.text_codec || caps.require_root.is_some();
        let require_enabled = caps.require_root.is_some();

        self.context
            .with(|ctx| -> rquickjs::Result<()> {
                let globals = ctx.globals();

                // console 转发缓冲
                if console_enabled {
                    let buffer = console;
                    globals.set(
                        "__ruquest_console",
                        Func::from(move |level: String, args: Value| -> rquickjs::Result<()> {
                            let json = js_to_json(&args)?;
                            let args = match json {
                                serde_json::Value::Array(items) => items,
                                other => vec![other],
                            };
                            buffer.borrow_mut().push(ConsoleEvent { level, args });
                            Ok(())
                        }),
                    )?;
                }

                if crypto_enabled {
                    globals.set(
                        "__ruquest_random_bytes",
                        Func::from(|ctx: Ctx<'_>, len: u32| -> rquickjs::Result<Vec<u8>> {
                            shims::random_bytes(&ctx, len as usize)
                        }),
                    )?;
                }

                // codec 宿主函数同时服务 TextEncoder shim 与 codec 内置模块
                if codec_enabled {
                    globals.set(
                        "__ruquest_utf8_encode",
                        Func::from(|text: String| -> Vec<u8> { text.into_bytes() }),
                    )?;
                    globals.set(
                        "__ruquest_utf8_decode",
                        Func::from(|bytes: Vec<u8>| -> String {
                            String::from_utf8_lossy(&bytes).into_owned()
                        }),
                    )?;
                }

                // hash / dates 内置模块的宿主侧实现
                if require_enabled {
                    globals.set(
                        "__ruquest_sha256",
                        Func::from(|text: String| -> String { shims::sha256_hex(&text) }),
                    )?;
                    globals.set(
                        "__ruquest_format_date",
                        Func::from(|millis: f64, fmt: String| -> String {
                            shims::format_timestamp(millis as i64, &fmt)
                        }),
                    )?;
                }

                // bru.interpolate：叠加 guest 当前的 runtime 变量后插值
                if let Some(base) = interpolate_base {
                    globals.set(
                        "__ruquest_interpolate",
                        Func::from(move |text: String, runtime_json: String| -> String {
                            interpolate_with_runtime(&base, &text, &runtime_json)
                        }),
                    )?;
                }

                // 受限 require
                if let Some(registry) = registry {
                    let registry = Rc::new(registry);
                    globals.set(
                        "require",
                        Func::from(move |ctx, spec: String| registry.load(ctx, spec)),
                    )?;
                }

                // bru.runRequest 的宿主桥；错误通过 JSON 信封传回 guest
                if let Some(hook) = run_request {
                    let counter = pending;
                    globals.set(
                        "__ruquest_run_request",
                        Func::from(Async(move |path: String| {
                            // 调用即记为在途，泵循环据此区分挂起与等待
                            counter.set(counter.get() + 1);
                            let hook = hook.clone();
                            let counter = counter.clone();
                            async move {
                                let envelope = hook(path).await;
                                counter.set(counter.get() - 1);
                                envelope
                            }
                        })),
                    )?;
                }

                // 数据全局（request / response / 状态）按值深拷贝注入
                for (name, value) in &caps_globals {
                    let js_value = json_to_js(&ctx, value)?;
                    globals.set(name.as_str(), js_value)?;
                }

                Ok(())
            })
            .await
            .map_err(|e| RuquestError::SandboxError(format!("Shim installation failed: {}", e)))?;

        self.eval_prelude(&shims::prelude(caps)).await
    }

    /// 执行一段 prelude（shim / bru API 定义），失败视为沙箱错误
    pub async fn eval_prelude(&self, source: &str) -> Result<()> {
        if source.trim().is_empty() {
            return Ok(());
        }
        let source = source.to_string();
        self.context
            .with(|ctx| -> std::result::Result<(), String> {
                ctx.eval::<(), _>(source.into_bytes())
                    .catch(&ctx)
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(RuquestError::SandboxError)
    }

    /// 运行用户脚本至完成
    ///
    /// 脚本包装为 async IIFE；guest 抛出映射为 ScriptError，
    /// 已发生的变量修改不回滚（run-until-exception 语义）。
    pub async fn run(&self, script: &str) -> Result<serde_json::Value> {
        let wrapped = wrap_async_iife(script);

        let handle: Persistent<Promise<'static>> = self
            .context
            .with(|ctx| -> std::result::Result<_, String> {
                let promise = ctx
                    .eval::<Promise, _>(wrapped.into_bytes())
                    .catch(&ctx)
                    .map_err(|e| e.to_string())?;
                Ok(Persistent::save(&ctx, promise))
            })
            .await
            .map_err(RuquestError::ScriptError)?;

        self.drive_to_completion(handle).await
    }

    /// 驱动 promise 到 settle
    ///
    /// 交替执行「查询 settle 状态」与「泵一轮 pending job」。
    /// 队列空且无在途宿主调用时即为脚本挂起；墙钟看门狗兜底。
    async fn drive_to_completion(
        &self,
        handle: Persistent<Promise<'static>>,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();

        loop {
            match self.settle_state(&handle).await? {
                PumpState::Settled(value) => {
                    trace!(elapsed_ms = started.elapsed().as_millis() as u64, "script settled");
                    return Ok(value);
                }
                PumpState::Errored(message) => return Err(RuquestError::ScriptError(message)),
                PumpState::Pending => {}
            }

            if let Some(timeout) = self.options.script_timeout
                && started.elapsed() > timeout
            {
                return Err(RuquestError::ScriptTimeout(timeout));
            }

            let ran = self
                .runtime
                .execute_pending_job()
                .await
                .map_err(|e| RuquestError::ScriptError(format!("QuickJS job failed: {}", e)))?;

            if !ran {
                if self.pending_hostcalls.get() == 0 {
                    // 队列已空仍未 settle：脚本永不 resolve
                    return Err(RuquestError::ScriptError(
                        "Script never settled its promise (empty job queue)".to_string(),
                    ));
                }
                // 驱动在途的宿主异步任务直至产生新 job
                self.runtime.idle().await;
            }
        }
    }

    async fn settle_state(&self, handle: &Persistent<Promise<'static>>) -> Result<PumpState> {
        let handle = handle.clone();
        self.context
            .with(|ctx| -> std::result::Result<PumpState, String> {
                let promise = handle.restore(&ctx).map_err(|e| e.to_string())?;
                match promise.state() {
                    PromiseState::Pending => Ok(PumpState::Pending),
                    PromiseState::Resolved => match promise.result::<Value>() {
                        Some(result) => match result.catch(&ctx) {
                            Ok(value) => Ok(PumpState::Settled(
                                js_to_json(&value).map_err(|e| e.to_string())?,
                            )),
                            Err(caught) => Ok(PumpState::Errored(caught.to_string())),
                        },
                        None => Ok(PumpState::Pending),
                    },
                    PromiseState::Rejected => match promise.result::<Value>() {
                        Some(result) => match result.catch(&ctx) {
                            Ok(value) => Ok(PumpState::Errored(reject_message(&value))),
                            Err(caught) => Ok(PumpState::Errored(caught.to_string())),
                        },
                        None => Ok(PumpState::Errored("Promise rejected".to_string())),
                    },
                }
            })
            .await
            .map_err(RuquestError::SandboxError)
    }

    /// 读取 guest 全局并反序列化为 JSON
    pub async fn global_json(&self, name: &str) -> Result<serde_json::Value> {
        let name = name.to_string();
        self.context
            .with(|ctx| -> std::result::Result<serde_json::Value, String> {
                let value: Value = ctx.globals().get(name.as_str()).map_err(|e| e.to_string())?;
                js_to_json(&value).map_err(|e| e.to_string())
            })
            .await
            .map_err(RuquestError::SandboxError)
    }

    /// 取走 guest console 输出缓冲
    pub fn drain_console(&self) -> Vec<ConsoleEvent> {
        self.console.borrow_mut().drain(..).collect()
    }

    /// 显式释放 VM 资源
    ///
    /// drop 同样会释放；这里提供确定性的收尾点并做一次 GC。
    pub async fn dispose(self) {
        self.runtime.run_gc().await;
        debug!("sandbox disposed");
    }
}

/// 脚本包进内层 async IIFE 保留其 return 值，
/// 外层等待 test() 注册的全部 promise 再 settle
fn wrap_async_iife(script: &str) -> String {
    format!(
        "(async () => {{\n\
         const __ruquest_value = await (async () => {{\n{}\n}})();\n\
         await Promise.all(globalThis.__ruquest_pending_tests ?? []);\n\
         return __ruquest_value;\n\
         }})()",
        script
    )
}

/// 被拒绝的 promise 值转错误消息：优先取 Error.message
fn reject_message(value: &Value<'_>) -> String {
    if let Some(obj) = value.as_object()
        && let Ok(message) = obj.get::<_, String>("message")
    {
        return message;
    }
    match js_to_json(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "Promise rejected".to_string(),
    }
}

fn interpolate_with_runtime(base: &VariableSet, text: &str, runtime_json: &str) -> String {
    let mut vars = base.clone();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(runtime_json) {
        for (key, value) in map {
            vars.runtime.insert(key, value);
        }
    }
    VariableResolver::interpolate(text, &vars)
}

/// serde_json::Value → guest Value，按值深拷贝
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    value: &serde_json::Value,
) -> rquickjs::Result<Value<'js>> {
    match value {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(Value::new_int(ctx.clone(), i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::new_float(ctx.clone(), f))
            } else {
                Ok(Value::new_null(ctx.clone()))
            }
        }
        serde_json::Value::String(s) => s.clone().into_js(ctx),
        serde_json::Value::Array(items) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        serde_json::Value::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
    }
}

/// guest Value → serde_json::Value
///
/// 只回读 JSON 兼容数据；函数、symbol 等一律降级为 null，
/// guest 函数绝不会跨边界返回宿主。
pub(crate) fn js_to_json(value: &Value<'_>) -> rquickjs::Result<serde_json::Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(serde_json::json!(i));
    }
    if let Some(f) = value.as_float() {
        return Ok(serde_json::json!(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(serde_json::Value::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for i in 0..array.len() {
            let item: Value = array.get(i)?;
            items.push(js_to_json(&item)?);
        }
        return Ok(serde_json::Value::Array(items));
    }
    if value.is_function() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(object) = value.as_object() {
        let mut map = serde_json::Map::new();
        for prop in object.props::<String, Value>() {
            let (key, item) = prop?;
            map.insert(key, js_to_json(&item)?);
        }
        return Ok(serde_json::Value::Object(map));
    }
    Ok(serde_json::Value::Null)
}

/// 在 guest 里抛出带消息的异常
pub(crate) fn throw_message(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    Exception::throw_message(ctx, message)
}
