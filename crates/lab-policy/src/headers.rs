//! 按路径模式的响应头策略。
//!
//! 策略列表有序；对每条请求路径，首个正则命中的策略生效，其声明的头在
//! 下游 Handler 运行前写入响应。正则与头名/头值都在构造期编译与校验，
//! 非法配置连同策略名一起在启动阶段报错。

use http::header::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

use lab_core::config::HeaderPolicyConfig;

use crate::error::PolicyError;

#[derive(Debug)]
struct CompiledPolicy {
    name: String,
    pattern: Regex,
    headers: HeaderMap,
}

/// 预编译的响应头策略集。
///
/// # 教案式说明
/// - **契约 (What)**：[`HeaderPolicySet::match_path`] 返回**首个**命中策略的
///   头集合（或 `None`）；列表顺序即优先级；
/// - **风险 (Trade-offs)**：匹配是对策略列表的线性扫描；策略数以个位数计，
///   不值得为其构建自动机。
#[derive(Debug)]
pub struct HeaderPolicySet {
    policies: Vec<CompiledPolicy>,
}

impl HeaderPolicySet {
    /// 编译策略列表；任何一条失败都携策略名报错。
    pub fn new(configs: &[HeaderPolicyConfig]) -> Result<Self, PolicyError> {
        let mut policies = Vec::with_capacity(configs.len());
        for config in configs {
            let pattern =
                Regex::new(&config.path_pattern).map_err(|err| PolicyError::PatternCompile {
                    policy: config.name.clone(),
                    detail: err.to_string(),
                })?;

            let mut headers = HeaderMap::with_capacity(config.headers.len());
            for (name, value) in &config.headers {
                let name: HeaderName =
                    name.parse().map_err(|_| PolicyError::InvalidHeader {
                        policy: config.name.clone(),
                        detail: format!("invalid header name `{name}`"),
                    })?;
                let value =
                    HeaderValue::from_str(value).map_err(|_| PolicyError::InvalidHeader {
                        policy: config.name.clone(),
                        detail: format!("invalid value for header `{name}`"),
                    })?;
                headers.insert(name, value);
            }

            policies.push(CompiledPolicy {
                name: config.name.clone(),
                pattern,
                headers,
            });
        }
        Ok(Self { policies })
    }

    /// 返回首个命中策略的 `(策略名, 头集合)`。
    pub fn match_path(&self, path: &str) -> Option<(&str, &HeaderMap)> {
        self.policies
            .iter()
            .find(|policy| policy.pattern.is_match(path))
            .map(|policy| (policy.name.as_str(), &policy.headers))
    }

    /// 策略条数。
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// 是否为空集。
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
