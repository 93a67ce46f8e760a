#![deny(unsafe_code)]
#![doc = "lab-frontend: 单页前端的首屏状态注入与按路由 HTML 缓存。"]
#![doc = ""]
#![doc = "前端首屏需要携带集群状态（网络目录、数据边界、构建版本），避免页面"]
#![doc = "加载后再发一轮 API 请求。本 crate 在启动时把 `index.html` 与可选的"]
#![doc = "`head.json` 预热为按路由的字节缓存，并订阅快照通知在后台整体重建。"]

mod assets;
mod cache;
mod error;
mod inject;

pub use assets::{FrontendAssets, RouteHead, load_assets};
pub use cache::{RouteCache, StateSource};
pub use error::FrontendError;
pub use inject::inject_all;

/// 兜底路由的缓存键。
pub const DEFAULT_ROUTE: &str = "_default";
