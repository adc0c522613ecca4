//! Clone URLs as seen from inside build containers.

use conveyor_config::HttpConfig;
use conveyor_core::{Error, Result};
use url::Url;

/// Build the clone URL for a repository path from the server's HTTP
/// network settings, e.g. `http://conveyor:3000/git/acme/api.git`.
///
/// Build containers talk plain HTTP to the server on its build network.
pub fn clone_url(http: &HttpConfig, repo_path: &str) -> Result<String> {
    let endpoint = format!("http://{}{}", http.network, http.bind);
    let base = Url::parse(&endpoint)
        .map_err(|e| Error::InvalidInput(format!("clone endpoint {:?}: {}", endpoint, e)))?;

    Ok(format!(
        "{}/git/{}.git",
        base.as_str().trim_end_matches('/'),
        repo_path.trim_matches('/')
    ))
}
