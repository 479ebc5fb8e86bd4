use liveclip_core::{CoreError, WS_PATH};
use url::Url;

/// Derives the websocket endpoint from the origin that hosts the session.
///
/// Secure origins (`https`) map to `wss`, plain ones to `ws`. An origin that is
/// already a websocket URL keeps its scheme. Path, query and fragment are
/// replaced by the fixed `/ws` endpoint.
pub fn endpoint_from_origin(origin: &str) -> Result<Url, CoreError> {
    let mut url = Url::parse(origin.trim())
        .map_err(|err| CoreError::InvalidEndpoint(format!("{origin}: {err}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::InvalidEndpoint(format!(
                "unsupported scheme {other:?}; expected http, https, ws or wss"
            )));
        }
    };
    if url.host_str().is_none_or(str::is_empty) {
        return Err(CoreError::InvalidEndpoint(format!("{origin}: missing host")));
    }

    url.set_scheme(scheme)
        .map_err(|_| CoreError::InvalidEndpoint(format!("cannot use scheme {scheme}")))?;
    url.set_path(WS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
