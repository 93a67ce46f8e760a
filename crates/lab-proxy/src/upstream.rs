//! # upstream 模块说明
//!
//! ## 角色定位（Why）
//! - `/api/v1/{network}/...` 的按网络反向代理：解析网络段、改写出站路径与
//!   查询、透传响应；后端表随拓扑快照热更新；
//! - 上游传输失败折叠为 502 JSON，错误细节只进日志，不进响应。
//!
//! ## 出站改写顺序（How）
//! 1. 目标 URL := `{target}/api/v1/{rest}`（网络段被剥除）；
//! 2. 设置 `X-Forwarded-For/-Proto/-Host`；
//! 3. 查询改写：`slot_{op}` → `slot_start_date_time_{op}`（fail-open）。
//!
//! ## 并发（Trade-offs）
//! - 后端表使用 `DashMap`：读路径在进入任何 await 之前复制出目标地址并释放
//!   分片锁；
//! - 连接池共享一个 reqwest 客户端（池按主机隔离：每主机至多 10 条空闲连接，
//!   空闲 90s 回收，拨号 10s、读 30s 超时），单请求无重试——返回给客户端的
//!   就是首个上游回应或其传输错误的映射。

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::TryStreamExt;
use http::header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response};
use http_body::Frame;
use http_body_util::{BodyExt, BodyStream, StreamBody};
use tracing::{debug, warn};

use lab_core::GatewayError;
use lab_core::network::Network;
use lab_core::wallclock::{DEFAULT_SECONDS_PER_SLOT, WallclockRegistry};

use crate::body::{BoxError, GatewayBody, error_response};
use crate::path::parse_api_path;
use crate::transform::transform_query;

/// 出站连接池参数，对齐 CBT 后端的长连接习惯。
const POOL_MAX_IDLE_PER_HOST: usize = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// 逐跳头集合：转发时剥除（出站与回程方向相同）。
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// 按网络寻址的反向代理。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`NetworkProxy::handle`] 是完整的请求入口：路径非法 400、网络未知
///     404、被禁用 503、上游传输失败 502，其余场景透传上游响应（含非 2xx）；
///   - [`NetworkProxy::add_network`] / [`NetworkProxy::remove_network`] /
///     [`NetworkProxy::update_network`] 支持运行期增删改；
///     [`NetworkProxy::apply_topology`] 把目录快照整体对账到后端表并补登
///     钟摆；
/// - **风险 (Trade-offs)**：禁用名单来自本地覆盖、构造时固化——禁用一个
///   网络本就需要改配置重启，动态化收益有限。
pub struct NetworkProxy {
    backends: DashMap<String, String>,
    disabled: HashSet<String>,
    wallclock: Arc<WallclockRegistry>,
    client: reqwest::Client,
}

impl NetworkProxy {
    /// 构造代理；`disabled` 为本地覆盖中 `enabled=false` 的名字集合。
    pub fn new(
        wallclock: Arc<WallclockRegistry>,
        disabled: HashSet<String>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::UpstreamTransport {
                network: String::new(),
                detail: format!("proxy client construction failed: {err}"),
            })?;
        Ok(Self {
            backends: DashMap::new(),
            disabled,
            wallclock,
            client,
        })
    }

    /// 注册网络后端；已存在时覆盖。
    pub fn add_network(&self, name: &str, target_url: &str) {
        self.backends
            .insert(name.to_owned(), target_url.trim_end_matches('/').to_owned());
    }

    /// 摘除网络后端。
    pub fn remove_network(&self, name: &str) {
        self.backends.remove(name);
    }

    /// 更新网络后端地址。
    pub fn update_network(&self, name: &str, target_url: &str) {
        self.add_network(name, target_url);
    }

    /// 已注册的网络数量。
    pub fn network_count(&self) -> usize {
        self.backends.len()
    }

    /// 将目录快照整体对账到后端表：新增/更新在册网络、摘除消失的网络，
    /// 并为每个网络补登槽位钟摆（幂等）。
    pub fn apply_topology(&self, networks: &BTreeMap<String, Network>) {
        for (name, network) in networks {
            self.add_network(name, &network.target_url);
            if network.genesis_time > 0 {
                self.wallclock
                    .register(name, network.genesis_time, DEFAULT_SECONDS_PER_SLOT);
            }
        }
        self.backends.retain(|name, _| networks.contains_key(name));
    }

    /// 处理一条 `/api/v1/{network}/...` 请求。
    pub async fn handle<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Response<GatewayBody>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError> + Send,
    {
        let path = req.uri().path().to_owned();
        let parsed = match parse_api_path(&path) {
            Ok(parsed) => parsed,
            Err(err) => return error_response(&err),
        };
        let network = parsed.network.to_owned();
        let rest = parsed.rest.to_owned();

        if self.disabled.contains(&network) {
            return error_response(&GatewayError::NetworkDisabled { network });
        }

        // 在进入任何 await 之前复制出目标地址，避免跨悬挂点持有分片锁。
        let target = match self.backends.get(&network) {
            Some(entry) => entry.value().clone(),
            None => return error_response(&GatewayError::NetworkUnknown { network }),
        };

        let query = req
            .uri()
            .query()
            .map(|query| transform_query(query, &network, &self.wallclock))
            .unwrap_or_default();

        let mut url = format!("{target}/api/v1/{rest}");
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let method = req.method().clone();
        let headers = outbound_headers(req.headers(), remote_addr);
        let body = req.into_body();
        let outbound_body = reqwest::Body::wrap_stream(
            BodyStream::new(body)
                .try_filter_map(|frame| std::future::ready(Ok(frame.into_data().ok()))),
        );

        debug!(
            target: "lab::proxy::upstream",
            %method,
            network = %network,
            url = %url,
            "forwarding request to network backend"
        );

        match self
            .client
            .request(method, &url)
            .headers(headers)
            .body(outbound_body)
            .send()
            .await
        {
            Ok(upstream) => passthrough_response(upstream),
            Err(err) => {
                warn!(
                    target: "lab::proxy::upstream",
                    network = %network,
                    error = %err,
                    "upstream transport failure"
                );
                error_response(&GatewayError::UpstreamTransport {
                    network,
                    detail: err.to_string(),
                })
            }
        }
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// 构造出站头：剥除 Host 与逐跳头，设置 `X-Forwarded-*` 族。
fn outbound_headers(inbound: &HeaderMap, remote_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        // Content-Length 交由出站客户端按实际体重新计算。
        if name == HOST || name == CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(addr) = remote_addr {
        let client_ip = addr.ip().to_string();
        let forwarded_for = match inbound.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {client_ip}"),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert("x-forwarded-for", value);
        }
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    if let Some(host) = inbound.get(HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }

    headers
}

/// 将上游响应原样透传（状态、非逐跳头、流式体）。
fn passthrough_response(upstream: reqwest::Response) -> Response<GatewayBody> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();

    let stream = upstream
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(|err| Box::new(err) as BoxError);
    let body = StreamBody::new(stream).boxed_unsync();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in &upstream_headers {
        if !is_hop_by_hop(name) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    response
}
