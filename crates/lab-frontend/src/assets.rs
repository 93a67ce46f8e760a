//! 前端资产装载：`index.html` 与可选的 `head.json`。
//!
//! 资产目录来自配置（生产为构建产物目录，本地开发指向 dev 输出）。
//! `index.html` 必须存在；`head.json` 缺失时视为只有兜底路由。

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::FrontendError;

/// `head.json` 中单个路由的片段：注入 `</head>` 之前的原始 HTML。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RouteHead {
    #[serde(default)]
    pub raw: String,
}

/// 预热所需的全部输入。
#[derive(Clone, Debug)]
pub struct FrontendAssets {
    pub index_html: String,
    pub heads: BTreeMap<String, RouteHead>,
}

/// 从资产目录装载 `index.html` 与可选的 `head.json`。
pub fn load_assets(dir: &Path) -> Result<FrontendAssets, FrontendError> {
    let index_path = dir.join("index.html");
    let index_html =
        std::fs::read_to_string(&index_path).map_err(|source| FrontendError::Asset {
            path: index_path,
            source,
        })?;

    let head_path = dir.join("head.json");
    let heads = match std::fs::read_to_string(&head_path) {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(source) => {
            return Err(FrontendError::Asset {
                path: head_path,
                source,
            });
        }
    };

    Ok(FrontendAssets { index_html, heads })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_head_json_yields_empty_route_table() {
        let dir = std::env::temp_dir().join(format!("lab-frontend-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        std::fs::write(dir.join("index.html"), "<html><head></head></html>")
            .expect("write index");

        let assets = load_assets(&dir).expect("load assets");
        assert!(assets.heads.is_empty());
        assert!(assets.index_html.contains("<head>"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
