use crate::collection::types::{
    AuthConfig, Collection, HeaderEntry, NodeConfig, RequestDefinition, ScriptFlow, VarAssignment,
};
use std::path::PathBuf;

/// 合并后的可执行单元
///
/// 由 ContextMerger 一次性产出，流水线各阶段只读。
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub collection_name: String,
    pub collection_path: PathBuf,
    pub environment_name: Option<String>,
    pub request: RequestDefinition,
    /// 合并后的 pre-request 脚本文本
    pub script_pre: String,
    /// 合并后的 post-response 脚本文本
    pub script_post: String,
    /// 合并后的测试脚本文本
    pub tests: String,
    /// 合并后的 pre 变量赋值（根 → 叶）
    pub vars_pre: Vec<VarAssignment>,
    /// 合并后的 post 变量赋值（根 → 叶）
    pub vars_post: Vec<VarAssignment>,
}

/// 按祖先链合并 headers / vars / scripts
pub struct ContextMerger;

impl ContextMerger {
    /// 合并入口
    ///
    /// `tree_path` 是从集合根到目标叶的 folder 名称链。
    /// 合并对缺失的可选字段保持宽容：缺省即空，绝不失败。
    pub fn merge(
        collection: &Collection,
        tree_path: &[&str],
        request: &RequestDefinition,
        flow: ScriptFlow,
    ) -> RequestContext {
        let ancestors = collection.ancestor_path(tree_path);
        let folder_configs: Vec<&NodeConfig> = ancestors.iter().map(|n| &n.root).collect();

        let mut merged = request.clone();
        merged.headers = Self::merge_headers(&collection.root, &folder_configs, request);
        merged.auth = Self::resolve_auth(&collection.root, &folder_configs, request);

        let (script_pre, script_post, tests) =
            Self::merge_scripts(&collection.root, &folder_configs, request, flow);

        RequestContext {
            collection_name: collection.name.clone(),
            collection_path: collection.path.clone(),
            environment_name: collection.environment_name.clone(),
            request: merged,
            script_pre,
            script_post,
            tests,
            vars_pre: Self::merge_vars(
                &collection.root.vars_pre,
                folder_configs.iter().map(|c| &c.vars_pre),
                &request.vars_pre,
            ),
            vars_post: Self::merge_vars(
                &collection.root.vars_post,
                folder_configs.iter().map(|c| &c.vars_post),
                &request.vars_post,
            ),
        }
    }

    /// Header 合并：根 → 叶，同名（忽略大小写）后者覆盖前者
    ///
    /// enabled=false 的条目在合并前丢弃，因此禁用的下层条目
    /// 不会遮蔽上层已启用的同名 header。
    fn merge_headers(
        collection_root: &NodeConfig,
        folders: &[&NodeConfig],
        request: &RequestDefinition,
    ) -> Vec<HeaderEntry> {
        let mut merged: Vec<HeaderEntry> = Vec::new();

        let layers = std::iter::once(&collection_root.headers)
            .chain(folders.iter().map(|c| &c.headers))
            .chain(std::iter::once(&request.headers));

        for layer in layers {
            for entry in layer.iter().filter(|h| h.enabled) {
                match merged
                    .iter_mut()
                    .find(|h| h.name.eq_ignore_ascii_case(&entry.name))
                {
                    Some(existing) => existing.value = entry.value.clone(),
                    None => merged.push(entry.clone()),
                }
            }
        }

        merged
    }

    /// 认证解析：Inherit 向上找最近一层显式配置
    fn resolve_auth(
        collection_root: &NodeConfig,
        folders: &[&NodeConfig],
        request: &RequestDefinition,
    ) -> AuthConfig {
        if request.auth != AuthConfig::Inherit {
            return request.auth.clone();
        }

        for config in folders.iter().rev() {
            match &config.auth {
                Some(AuthConfig::Inherit) | None => continue,
                Some(auth) => return auth.clone(),
            }
        }
        match &collection_root.auth {
            Some(auth) if *auth != AuthConfig::Inherit => auth.clone(),
            _ => AuthConfig::None,
        }
    }

    /// 变量合并：根 → 叶拼接，禁用条目剔除
    fn merge_vars<'a>(
        collection_vars: &[VarAssignment],
        folder_vars: impl Iterator<Item = &'a Vec<VarAssignment>>,
        request_vars: &[VarAssignment],
    ) -> Vec<VarAssignment> {
        let mut merged: Vec<VarAssignment> = Vec::new();
        merged.extend(collection_vars.iter().filter(|v| v.enabled).cloned());
        for layer in folder_vars {
            merged.extend(layer.iter().filter(|v| v.enabled).cloned());
        }
        merged.extend(request_vars.iter().filter(|v| v.enabled).cloned());
        merged
    }

    /// 脚本合并
    ///
    /// sequential：pre 与 post/tests 均为根 → 叶。
    /// sandwich（默认）：pre 为根 → 叶；post/tests 为叶 → 根，
    /// 即请求脚本包在集合脚本内侧。
    /// 反转只作用于本地副本，祖先数据不被修改。
    fn merge_scripts(
        collection_root: &NodeConfig,
        folders: &[&NodeConfig],
        request: &RequestDefinition,
        flow: ScriptFlow,
    ) -> (String, String, String) {
        let folder_pre: Vec<&str> = folders
            .iter()
            .filter_map(|c| c.script_pre.as_deref())
            .collect();
        let folder_post: Vec<&str> = folders
            .iter()
            .filter_map(|c| c.script_post.as_deref())
            .collect();
        let folder_tests: Vec<&str> = folders
            .iter()
            .filter_map(|c| c.tests.as_deref())
            .collect();

        // pre-request 在两种策略下都是根 → 叶
        let script_pre = Self::join_scripts(
            std::iter::once(collection_root.script_pre.as_deref())
                .chain(folder_pre.iter().copied().map(Some))
                .chain(std::iter::once(request.script_pre.as_deref())),
        );

        let (script_post, tests) = match flow {
            ScriptFlow::Sequential => (
                Self::join_scripts(
                    std::iter::once(collection_root.script_post.as_deref())
                        .chain(folder_post.iter().copied().map(Some))
                        .chain(std::iter::once(request.script_post.as_deref())),
                ),
                Self::join_scripts(
                    std::iter::once(collection_root.tests.as_deref())
                        .chain(folder_tests.iter().copied().map(Some))
                        .chain(std::iter::once(request.tests.as_deref())),
                ),
            ),
            ScriptFlow::Sandwich => {
                // 叶 → 根：在副本上反转
                let mut post_rev = folder_post.clone();
                post_rev.reverse();
                let mut tests_rev = folder_tests.clone();
                tests_rev.reverse();

                (
                    Self::join_scripts(
                        std::iter::once(request.script_post.as_deref())
                            .chain(post_rev.iter().copied().map(Some))
                            .chain(std::iter::once(collection_root.script_post.as_deref())),
                    ),
                    Self::join_scripts(
                        std::iter::once(request.tests.as_deref())
                            .chain(tests_rev.iter().copied().map(Some))
                            .chain(std::iter::once(collection_root.tests.as_deref())),
                    ),
                )
            }
        };

        (script_pre, script_post, tests)
    }

    fn join_scripts<'a>(parts: impl Iterator<Item = Option<&'a str>>) -> String {
        parts
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
