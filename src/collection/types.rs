use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 单个 Header 条目，保持原始顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }

    pub fn disabled(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: false,
        }
    }
}

/// 变量赋值条目（vars.req / vars.res）
///
/// value 是表达式文本：pre 阶段直接插值求值，
/// post 阶段按 `res.*` 路径从响应中提取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarAssignment {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl VarAssignment {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// 断言条目：name 为取值表达式（如 `res.status`），value 为 `运算符 期望值`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AssertionEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// 请求参数条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    Query,
    Path,
}

/// 请求体变体
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RequestBody {
    #[default]
    None,
    Json {
        content: String,
    },
    Text {
        content: String,
    },
    Xml {
        content: String,
    },
    Sparql {
        content: String,
    },
    FormUrlEncoded {
        fields: Vec<VarAssignment>,
    },
    MultipartForm {
        fields: Vec<VarAssignment>,
    },
    Graphql {
        query: String,
        #[serde(default)]
        variables: String,
    },
    File {
        path: PathBuf,
    },
}

/// 认证配置变体
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum AuthConfig {
    #[default]
    None,
    /// 从上层（folder / collection）继承
    Inherit,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

/// 一次运行的请求定义
///
/// 由存储条目加上继承的 collection/folder 根配置构造，
/// 对流水线不可变；脚本请求的修改通过显式返回值生效。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefinition {
    pub name: String,
    pub method: String,
    pub url: String,
    pub params: Vec<ParamEntry>,
    pub headers: Vec<HeaderEntry>,
    pub body: RequestBody,
    pub auth: AuthConfig,
    pub vars_pre: Vec<VarAssignment>,
    pub vars_post: Vec<VarAssignment>,
    pub script_pre: Option<String>,
    pub script_post: Option<String>,
    pub tests: Option<String>,
    pub assertions: Vec<AssertionEntry>,
    pub on_fail: Option<String>,
}

/// folder / collection 根配置，被后代继承
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub headers: Vec<HeaderEntry>,
    pub vars_pre: Vec<VarAssignment>,
    pub vars_post: Vec<VarAssignment>,
    pub script_pre: Option<String>,
    pub script_post: Option<String>,
    pub tests: Option<String>,
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Request,
}

/// 集合树节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionNode {
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub root: NodeConfig,
    #[serde(default)]
    pub children: Vec<CollectionNode>,
}

impl CollectionNode {
    pub fn folder(name: impl Into<String>, root: NodeConfig) -> Self {
        Self {
            kind: NodeKind::Folder,
            name: name.into(),
            root,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<CollectionNode>) -> Self {
        self.children = children;
        self
    }
}

/// 脚本合成策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFlow {
    /// 请求脚本在最内层：pre 为根 → 叶，post/tests 为叶 → 根（默认）
    #[default]
    Sandwich,
    /// pre 与 post 均为根 → 叶
    Sequential,
}

/// 集合：根配置 + 目录树
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Collection {
    pub name: String,
    /// 集合根目录（脚本 require 的限制边界）
    pub path: PathBuf,
    pub root: NodeConfig,
    pub tree: Vec<CollectionNode>,
    pub script_flow: ScriptFlow,
    /// 当前激活的环境名（bru.getEnvName）
    pub environment_name: Option<String>,
}

impl Collection {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// 按名称路径求出根到目标叶的祖先 folder 链
    ///
    /// `segments` 不含集合自身；找不到的段位直接终止，
    /// 返回已匹配的前缀（merge 对缺失路径保持宽容）。
    pub fn ancestor_path(&self, segments: &[&str]) -> Vec<&CollectionNode> {
        let mut path = Vec::new();
        let mut nodes = &self.tree;
        for segment in segments {
            let Some(node) = nodes
                .iter()
                .find(|n| n.kind == NodeKind::Folder && n.name == *segment)
            else {
                break;
            };
            path.push(node);
            nodes = &node.children;
        }
        path
    }
}

fn default_enabled() -> bool {
    true
}
