use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;

use crate::models::settings::{AppSettings, ProxySettings};

fn proxy_scheme(proxy: &ProxySettings) -> &'static str {
    match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    }
}

/// Proxy URL without credentials, as accepted by `--proxy-server`.
pub fn proxy_server_arg(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    Some(format!("{}://{}:{}", proxy_scheme(proxy), proxy.host, proxy.port))
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    if !proxy.enabled || proxy.host.is_empty() {
        return builder;
    }
    let scheme = proxy_scheme(proxy);
    let proxy_url = if !proxy.username.is_empty() {
        format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        )
    } else {
        format!("{}://{}:{}", scheme, proxy.host, proxy.port)
    };
    match reqwest::Proxy::all(&proxy_url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Base client builder shared by every network strategy.
pub fn client_builder(settings: &AppSettings) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(50)
        .pool_idle_timeout(Duration::from_secs(30));
    apply_proxy(builder, &settings.proxy)
}

pub fn cookie_client(settings: &AppSettings, jar: Arc<Jar>) -> reqwest::Result<reqwest::Client> {
    client_builder(settings).cookie_provider(jar).build()
}

pub fn plain_client(settings: &AppSettings) -> reqwest::Result<reqwest::Client> {
    client_builder(settings).build()
}
