//! 项目与应用领域模型

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 构建配置中保留的端口键，不会进入容器环境变量
pub const PORT_KEY: &str = "PORT";

/// 未配置端口时的容器端口
pub const DEFAULT_CONTAINER_PORT: u16 = 8080;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 项目：应用的归属单元，对应集群中的一个命名空间
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Project {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// 创建新项目
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            namespace: namespace.into(),
            description: None,
            created_at: Utc::now(),
        }
    }
}

/// 构建类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// 仓库自带 Dockerfile
    Dockerfile,
    Java17,
    Java21,
    Python,
    Nodejs,
}

impl BuildType {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Dockerfile => "dockerfile",
            BuildType::Java17 => "java17",
            BuildType::Java21 => "java21",
            BuildType::Python => "python",
            BuildType::Nodejs => "nodejs",
        }
    }

    /// 是否直接使用仓库中的容器文件（否则由内置模板生成）
    pub fn uses_container_file(&self) -> bool {
        matches!(self, BuildType::Dockerfile)
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 构建配置
///
/// 有序的字符串键值映射。`PORT` 为保留键，指定容器暴露端口；
/// 其余键按插入顺序成为容器环境变量。
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct BuildConfig(IndexMap<String, String>);

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖一个键（覆盖时保留原位置）
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 容器端口
    ///
    /// 缺失、无法解析或为 0 时回退到 [`DEFAULT_CONTAINER_PORT`]
    pub fn port(&self) -> u16 {
        self.get(PORT_KEY)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_CONTAINER_PORT)
    }

    /// 运行时环境变量（排除保留键，保持顺序）
    pub fn env_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(k, _)| *k != PORT_KEY)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BuildConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// 应用：绑定到源码仓库分支的可部署单元
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Application {
    #[serde(default = "new_id")]
    pub id: String,
    pub project_id: String,
    /// 显示名称，资源名由它规范化得到
    pub name: String,
    /// 仓库地址
    pub repository: String,
    pub branch: String,
    pub build_type: BuildType,
    /// 容器文件路径（相对仓库根目录，默认 "Dockerfile"）
    #[serde(default)]
    pub dockerfile_path: Option<String>,
    #[serde(default)]
    pub build_config: Option<BuildConfig>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Application {
    /// 创建新应用
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        build_type: BuildType,
    ) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            name: name.into(),
            repository: repository.into(),
            branch: branch.into(),
            build_type,
            dockerfile_path: None,
            build_config: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_build_config(mut self, config: BuildConfig) -> Self {
        self.build_config = Some(config);
        self
    }

    pub fn with_dockerfile_path(mut self, path: impl Into<String>) -> Self {
        self.dockerfile_path = Some(path.into());
        self
    }
}
