#![deny(unsafe_code)]
#![doc = "lab-gateway: 进程装配与 HTTP 服务面。"]
#![doc = ""]
#![doc = "把各组件 crate 收拢为一个可运行的网关进程：路径分发、策略中间件链"]
#![doc = "（恢复 → 请求日志 → 指标 → CORS → 响应头策略 → 限流 → Handler）、"]
#![doc = "固定端点（/health、/metrics、/api/v1/config、bounds）、hyper 服务循环"]
#![doc = "与优雅停机编排。除 main 以外不含业务逻辑：所有领域行为都在被装配的"]
#![doc = "组件里。"]

mod bootstrap;
mod metrics;
mod middleware;
mod router;
mod server;
mod state;
mod view;

pub use bootstrap::run;
pub use metrics::HttpMetrics;
pub use middleware::handle_request;
pub use state::{AppState, ProviderStateSource};
pub use view::{ConfigSnapshot, build_config_snapshot};
