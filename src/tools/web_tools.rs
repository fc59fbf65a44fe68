//! WebFetch and WebSearch tools (spec §4.3). Network-bound, not sandboxed by the
//! Workspace Sandbox (there is no "path" to resolve), but still mediated by this
//! module so policy gating and error taxonomy stay uniform with the other tools.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use serde::Deserialize;

const MAX_FETCH_BYTES: usize = 256 * 1024;

pub async fn fetch(_ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let url = call
        .args
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("WebFetch requires 'url'".into()))?;
    let parsed = url::Url::parse(url).map_err(|e| ToolError::InvalidArgs(format!("invalid url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ToolError::InvalidArgs("only http(s) urls are fetchable".into()));
    }

    let resp = reqwest::get(parsed)
        .await
        .map_err(|e| ToolError::NetworkError(e.to_string()))?;
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with("text/") && !content_type.contains("json") && !content_type.is_empty() {
        return Err(ToolError::InvalidArgs(format!(
            "unsupported content type for WebFetch: {content_type}"
        )));
    }

    let body = resp.text().await.map_err(|e| ToolError::NetworkError(e.to_string()))?;
    let truncated = body.len() > MAX_FETCH_BYTES;
    let text = if truncated {
        body[..MAX_FETCH_BYTES].to_string()
    } else {
        body
    };
    let plain = strip_tags(&text);

    Ok(ToolResult::ok(
        call,
        format!("fetched {url} ({} bytes)", plain.len()),
        serde_json::json!({ "url": url, "content": plain, "truncated": truncated }),
    ))
}

fn strip_tags(html: &str) -> String {
    if !html.trim_start().starts_with('<') {
        return html.to_string();
    }
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Deserialize)]
struct SearchResultItem {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

pub async fn search(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let query = call
        .args
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArgs("WebSearch requires 'query'".into()))?;

    let creds = crate::credentials::Credentials::load(&crate::credentials::credentials_file());
    let api_key = crate::credentials::resolve_api_key("websearch", None, &creds)
        .ok_or_else(|| ToolError::CredentialMissing("websearch".into()))?;

    let _ = &ctx.project_root;
    let client = reqwest::Client::new();
    let resp = client
        .get("https://api.search.ridgeline.invalid/v1/search")
        .query(&[("q", query)])
        .header("Authorization", format!("Bearer {api_key}"))
        .send()
        .await
        .map_err(|e| ToolError::NetworkError(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ToolError::NetworkError(format!("search backend returned {}", resp.status())));
    }
    let results: Vec<SearchResultItem> = resp.json().await.map_err(|e| ToolError::NetworkError(e.to_string()))?;

    let rendered: Vec<serde_json::Value> = results
        .iter()
        .map(|r| serde_json::json!({ "title": r.title, "url": r.url, "snippet": r.snippet }))
        .collect();

    Ok(ToolResult::ok(
        call,
        format!("{} result(s) for {query}", rendered.len()),
        serde_json::json!({ "results": rendered }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_markup() {
        assert_eq!(strip_tags("<p>hi <b>there</b></p>"), "hi there");
    }

    #[test]
    fn strip_tags_passes_through_plain_text() {
        assert_eq!(strip_tags("already plain"), "already plain");
    }
}
