//! Shared plumbing of the outbound HTTP clients.

use std::time::Duration;

use url::Url;

use crate::error::{PipelineError, Result};

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(PipelineError::Http)
}

pub(crate) fn parse_base(raw: &str) -> Result<Url> {
    let mut base = Url::parse(raw)
        .map_err(|err| PipelineError::Config(format!("invalid url `{raw}`: {err}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// `base` followed by a storage pathname, each segment percent-encoded.
pub(crate) fn endpoint(base: &Url, pathname: &str) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| PipelineError::Config(format!("url `{base}` cannot be a base")))?;
        segments.pop_if_empty();
        segments.extend(pathname.split('/').filter(|segment| !segment.is_empty()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_encoded_pathname() {
        let base = parse_base("http://vith:1080").unwrap();
        let url = endpoint(&base, "/photos/my trip.jpg").unwrap();
        assert_eq!(url.as_str(), "http://vith:1080/photos/my%20trip.jpg");

        let nested = parse_base("http://exas:1080/api").unwrap();
        let url = endpoint(&nested, "/a.jpg").unwrap();
        assert_eq!(url.as_str(), "http://exas:1080/api/a.jpg");
    }
}
