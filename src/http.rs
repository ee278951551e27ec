//! Small helpers shared by the outbound HTTP clients.

/// Parse and normalize a base URL, dropping any trailing slash from its path.
pub(crate) fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string().trim_end_matches('/').to_string())
}

/// Join a base URL and a relative path with exactly one slash between them.
pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Build a `reqwest` client with the service user agent.
pub(crate) fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("rulebook-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
}
