//! 内置沙箱文件系统工具
//!
//! SafeFs 绑定工作区根目录，所有路径必须解析到根目录之下（禁止 ../ 逃逸）。
//! 没有配置名为 `filesystem` 的外部提供者时，这组工具以进程内提供者的身份注册。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{InProcessProvider, Tool, ToolRegistry};

/// 内置文件系统提供者的 id，与默认兜底路由规则一致
pub const FILESYSTEM_PROVIDER_ID: &str = "filesystem";

/// 沙箱文件系统
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 词法解析相对路径：拒绝绝对路径与越过根目录的 `..`
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let mut resolved = self.root_dir.clone();
        let mut depth = 0usize;
        for component in Path::new(path.trim()).components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(format!("path escapes workspace: {path}"));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("absolute paths are not allowed: {path}"));
                }
            }
        }
        Ok(resolved)
    }

    pub async fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("read {path} failed: {e}"))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<usize, String> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("create parent of {path} failed: {e}"))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| format!("write {path} failed: {e}"))?;
        Ok(content.len())
    }

    /// 列出目录（隐藏文件除外），目录名以 `/` 结尾，按名称排序
    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| format!("list {path} failed: {e}"))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| e.to_string())? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(entries)
    }

    /// 在目录（或单个文件）下逐行匹配正则，返回 `相对路径:行号: 内容`
    ///
    /// 跳过隐藏目录、target、node_modules 与超过 max_file_size 的文件；无法读取的文件忽略。
    pub fn search(
        &self,
        path: &str,
        pattern: &regex::Regex,
        include: Option<&glob::Pattern>,
        max_results: usize,
    ) -> Result<Vec<String>, String> {
        let base = self.resolve(path)?;
        if !base.exists() {
            return Err(format!("search {path} failed: no such file or directory"));
        }
        let mut hits = Vec::new();
        let walker = walkdir::WalkDir::new(&base)
            .max_depth(SEARCH_MAX_DEPTH)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                e.depth() == 0 || (!name.starts_with('.') && name != "target" && name != "node_modules")
            })
            .filter_map(|e| e.ok());
        for entry in walker {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(include) = include {
                let file_name = entry.file_name().to_string_lossy();
                if !include.matches(&file_name) {
                    continue;
                }
            }
            if entry.metadata().map(|m| m.len() > SEARCH_MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let shown = entry
                .path()
                .strip_prefix(&self.root_dir)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (line_no, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    hits.push(format!("{shown}:{}: {}", line_no + 1, line.trim_end()));
                    if hits.len() >= max_results {
                        return Ok(hits);
                    }
                }
            }
        }
        Ok(hits)
    }
}

const SEARCH_MAX_DEPTH: usize = 10;
const SEARCH_MAX_FILE_SIZE: u64 = 1024 * 1024;
const SEARCH_MAX_RESULTS: usize = 50;

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string argument '{key}'"))
}

pub struct ReadTextFileTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for ReadTextFileTool {
    fn name(&self) -> &str {
        "read_text_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 file inside the workspace. Args: {\"path\": \"relative path\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path")?;
        tracing::debug!(path, "read_text_file");
        self.fs.read_file(path).await
    }
}

pub struct WriteFileTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file inside the workspace. Args: {\"path\": \"relative path\", \"content\": \"text\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let bytes = self.fs.write_file(path, content).await?;
        tracing::debug!(path, bytes, "write_file");
        Ok(format!("wrote {bytes} bytes to {path}"))
    }
}

pub struct ListDirectoryTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace. Args: {\"path\": \"relative path, default '.'\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        Ok(self.fs.list_dir(path).await?.join("\n"))
    }
}

pub struct SearchFilesTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents inside the workspace by regex. Args: {\"pattern\": \"regex\", \"path\": \"relative path, default '.'\", \"include\": \"optional file glob, e.g. *.rs\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "include": { "type": "string" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let raw = str_arg(&args, "pattern")?;
        let pattern =
            regex::Regex::new(raw).map_err(|e| format!("invalid pattern '{raw}': {e}"))?;
        let include = match args.get("include").and_then(Value::as_str) {
            Some(glob) => Some(
                glob::Pattern::new(glob).map_err(|e| format!("invalid include '{glob}': {e}"))?,
            ),
            None => None,
        };
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".").to_string();
        let fs = self.fs.clone();
        let hits = tokio::task::spawn_blocking(move || {
            fs.search(&path, &pattern, include.as_ref(), SEARCH_MAX_RESULTS)
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))??;
        tracing::debug!(pattern = raw, matches = hits.len(), "search_files");
        if hits.is_empty() {
            return Ok(format!("No matches found for pattern '{raw}'"));
        }
        Ok(hits.join("\n"))
    }
}

/// 工作区沙箱内的 read_text_file / write_file / list_directory / search_files
pub fn filesystem_provider(workspace: impl AsRef<Path>) -> InProcessProvider {
    let fs = SafeFs::new(workspace);
    let registry = ToolRegistry::new()
        .with(ReadTextFileTool { fs: fs.clone() })
        .with(WriteFileTool { fs: fs.clone() })
        .with(ListDirectoryTool { fs: fs.clone() })
        .with(SearchFilesTool { fs });
    InProcessProvider::new(FILESYSTEM_PROVIDER_ID, registry)
}
