// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 以字符串形式解析链接；基址或链接无法解析时原样返回链接
pub fn resolve_href(base_url: &str, href: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| resolve_url(&base, href.trim()))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// 读取查询参数的值
pub fn get_url_query_param_value(url: &str, name: &str) -> Option<String> {
    Url::parse(url).ok()?.query_pairs().find_map(|(key, value)| {
        if key == name {
            Some(value.into_owned())
        } else {
            None
        }
    })
}

/// 添加或替换查询参数，其余参数保持原有顺序
pub fn add_or_replace_url_param(url: &str, name: &str, value: &str) -> Result<String, ParseError> {
    let mut parsed = Url::parse(url)?;
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    match pairs.iter_mut().find(|(k, _)| k == name) {
        Some(pair) => pair.1 = value.to_string(),
        None => pairs.push((name.to_string(), value.to_string())),
    }
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(parsed.into())
}

/// 远程会话的VNC观察地址：`ws://{host[:port]}/vnc/{session_id}`
pub fn vnc_url(endpoint: &str, session_id: &str) -> Result<String, ParseError> {
    let parsed = Url::parse(endpoint)?;
    let host = parsed.host_str().ok_or(ParseError::EmptyHost)?;
    Ok(match parsed.port() {
        Some(port) => format!("ws://{}:{}/vnc/{}", host, port, session_id),
        None => format!("ws://{}/vnc/{}", host, session_id),
    })
}
