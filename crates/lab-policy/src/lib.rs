#![deny(unsafe_code)]
#![doc = "lab-policy: 请求面策略栈。"]
#![doc = ""]
#![doc = "三件彼此独立的策略组件：按路径模式匹配的响应头策略（首个命中生效）、"]
#![doc = "从代理头链中提取真实客户端 IP、以共享 KV 计数器实现的滑动窗口限流"]
#![doc = "（含 CIDR 豁免与可配置的存储故障策略）。全部模式在构造期编译，"]
#![doc = "非法配置在启动阶段即失败。"]

mod client_ip;
mod error;
mod exempt;
mod headers;
mod limiter;

pub use client_ip::extract_client_ip;
pub use error::PolicyError;
pub use exempt::CidrMatcher;
pub use headers::HeaderPolicySet;
pub use limiter::{RateLimitDecision, RateLimitVerdict, RateLimiter};
