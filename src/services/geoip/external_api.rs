//! 外部 GeoIP API 实现
//!
//! 使用外部 HTTP API 进行 IP 地理位置查询（如 ip-api.com）
//! 内置 LRU 缓存 + Singleflight 语义，避免重复查询

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{trace, warn};
use ureq::Agent;

use super::provider::{GeoInfo, GeoIpLookup};

/// GeoIP 缓存 TTL（15 分钟）
const GEOIP_CACHE_TTL_SECS: u64 = 15 * 60;
/// GeoIP 缓存最大容量
const GEOIP_CACHE_MAX_CAPACITY: u64 = 10_000;
/// HTTP 请求超时时间
const HTTP_TIMEOUT_SECS: u64 = 2;

/// 全局 HTTP Agent（ureq 的 Agent 是 Send + Sync）
static HTTP_AGENT: OnceLock<Agent> = OnceLock::new();

fn get_agent() -> &'static Agent {
    HTTP_AGENT.get_or_init(|| {
        Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(HTTP_TIMEOUT_SECS)))
            .build()
            .into()
    })
}

/// 外部 API GeoIP Provider
///
/// 内置 Moka 缓存：
/// - LRU 淘汰策略，最大 10000 条
/// - TTL 15 分钟
/// - Singleflight：同一 IP 的并发请求只发一次 HTTP
pub struct ExternalApiProvider {
    api_url_template: String,
    /// IP → GeoInfo 缓存（Option 用于负缓存）
    cache: Cache<String, Option<GeoInfo>>,
}

impl ExternalApiProvider {
    /// 创建外部 API Provider
    ///
    /// `api_url_template` 使用 `{ip}` 作为占位符
    /// 例如: `http://ip-api.com/json/{ip}?fields=status,countryCode,city`
    pub fn new(api_url_template: &str) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEOIP_CACHE_TTL_SECS))
            .max_capacity(GEOIP_CACHE_MAX_CAPACITY)
            .build();

        Self {
            api_url_template: api_url_template.to_string(),
            cache,
        }
    }

    /// 从外部 API 获取 GeoIP 信息（同步，在 spawn_blocking 中调用）
    fn fetch_from_api_sync(url: String) -> Option<GeoInfo> {
        let agent = get_agent();

        let resp = match agent.get(&url).call() {
            Ok(r) => r,
            Err(e) => {
                warn!("GeoIP API request to \"{}\" failed: {}", url, e);
                return None;
            }
        };

        let json: serde_json::Value = match resp.into_body().read_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("GeoIP API response from \"{}\" parse failed: {}", url, e);
                return None;
            }
        };

        parse_geo_json(&json)
    }

    /// 从外部 API 获取 GeoIP 信息（异步包装）
    async fn fetch_from_api(&self, ip: &str) -> Option<GeoInfo> {
        let url = self.api_url_template.replace("{ip}", ip);

        // 使用 spawn_blocking 在线程池中执行同步 HTTP 请求
        tokio::task::spawn_blocking(move || Self::fetch_from_api_sync(url))
            .await
            .unwrap_or_else(|e| {
                warn!("GeoIP spawn_blocking failed: {}", e);
                None
            })
    }
}

/// 解析常见 GeoIP API 的返回
///
/// ip-api.com: `{"countryCode": "CN", "regionName": "Zhejiang", "city": "Hangzhou", "isp": "..."}`，
/// 失败时 `{"status": "fail"}`；高德风格的 `province` / `adcode` 字段同样识别。
fn parse_geo_json(json: &serde_json::Value) -> Option<GeoInfo> {
    if json["status"].as_str() == Some("fail") || json["status"].as_str() == Some("0") {
        trace!("External API returned fail status");
        return None;
    }

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| json[*k].as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let country = text(&["countryCode", "country_code", "country"]);
    let province = text(&["regionName", "province", "region"]);
    let city = text(&["city"]);
    let isp = text(&["isp", "org"]);
    let adcode = text(&["adcode"]).or_else(|| json["adcode"].as_i64().map(|n| n.to_string()));

    trace!(
        "External API lookup: country={:?}, province={:?}, city={:?}, isp={:?}",
        country, province, city, isp
    );

    Some(GeoInfo {
        country,
        province,
        city,
        adcode,
        isp,
    })
}

#[async_trait]
impl GeoIpLookup for ExternalApiProvider {
    /// 查询 IP 地理位置（带缓存 + Singleflight）
    ///
    /// - 缓存命中：直接返回
    /// - 缓存未命中：发起 HTTP 请求并缓存结果
    /// - 并发请求同一 IP：只有一个发起请求，其他等待结果
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let ip_key = ip.to_string();

        // get_with 自带 singleflight 语义：
        // 同一 key 的并发调用只会执行一次闭包，其他等待结果
        // 返回类型是 Option<GeoInfo>（缓存的值类型）
        self.cache
            .get_with(ip_key, async {
                trace!("GeoIP cache miss for {}, fetching from API", ip);
                self.fetch_from_api(ip).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ExternalAPI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ip_api_response() {
        let geo = parse_geo_json(&json!({
            "status": "success",
            "countryCode": "CN",
            "regionName": "Zhejiang",
            "city": "Hangzhou",
            "isp": "China Telecom"
        }))
        .unwrap();

        assert_eq!(geo.country.as_deref(), Some("CN"));
        assert_eq!(geo.province.as_deref(), Some("Zhejiang"));
        assert_eq!(geo.city.as_deref(), Some("Hangzhou"));
        assert_eq!(geo.isp.as_deref(), Some("China Telecom"));
        assert_eq!(geo.adcode, None);
    }

    #[test]
    fn test_parse_amap_style_response() {
        let geo = parse_geo_json(&json!({
            "status": "1",
            "province": "浙江省",
            "city": "杭州市",
            "adcode": "330100"
        }))
        .unwrap();

        assert_eq!(geo.province.as_deref(), Some("浙江省"));
        assert_eq!(geo.adcode.as_deref(), Some("330100"));
    }

    #[test]
    fn test_parse_fail_status() {
        assert!(parse_geo_json(&json!({"status": "fail", "message": "private range"})).is_none());
    }

    /// 依赖外部网络服务，CI 环境可能失败
    #[tokio::test]
    #[ignore]
    async fn test_external_api_provider_lookup() {
        let provider = ExternalApiProvider::new(
            "http://ip-api.com/json/{ip}?fields=status,countryCode,regionName,city,isp",
        );

        let first = provider.lookup("8.8.8.8").await;
        assert_eq!(first.as_ref().and_then(|g| g.country.as_deref()), Some("US"));

        let second = provider.lookup("8.8.8.8").await;
        assert_eq!(first, second, "Cached result should match");
    }
}
