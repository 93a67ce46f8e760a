#![deny(unsafe_code)]
#![doc = "lab-proxy: 网关的请求面核心。"]
#![doc = ""]
#![doc = "两条互相独立的转发路径：按网络寻址的反向代理（路径解析、槽位过滤参数"]
#![doc = "改写、上游错误映射）与 gas-profiler 的健康门控 JSON-RPC 代理（端点健康"]
#![doc = "轮询、健康者间轮转）。两者都把上游失败折叠为类型化 JSON 错误体，绝不向"]
#![doc = "客户端泄漏传输层细节。"]

pub mod body;
pub mod gas;
mod path;
pub mod rpc;
mod transform;
mod upstream;

pub use path::{ApiPath, parse_api_path};
pub use rpc::{EndpointPool, RpcEndpoint};
pub use transform::transform_query;
pub use upstream::NetworkProxy;
