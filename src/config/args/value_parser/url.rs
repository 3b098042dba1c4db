use url::Url;

use crate::location::is_object_storage_url;

const INVALID_ENDPOINT_URL: &str = "Endpoint URL must be http:// or https:// with a host";

pub fn check_endpoint_url(url: &str) -> Result<String, String> {
    Url::parse(url).map_err(|e| e.to_string())?;

    if !is_object_storage_url(url) {
        return Err(INVALID_ENDPOINT_URL.to_string());
    }

    Ok(url.to_string())
}
