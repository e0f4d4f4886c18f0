use url::Url;

use crate::error::StoreError;

const MXC_SCHEME: &str = "mxc://";

/// Server name and media ID parsed from an `mxc://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLocator {
    pub server_name: String,
    pub media_id: String,
}

impl MediaLocator {
    pub fn parse(uri: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidMediaUri(uri.to_owned());
        let rest = uri.strip_prefix(MXC_SCHEME).ok_or_else(invalid)?;
        let (server_name, media_id) = rest.split_once('/').ok_or_else(invalid)?;
        if server_name.is_empty() || media_id.is_empty() || media_id.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            server_name: server_name.to_owned(),
            media_id: media_id.to_owned(),
        })
    }
}

/// Build the backend URL serving a media file.
///
/// Encrypted media is flagged so the backend decrypts it; the image auth token
/// is attached when present so plain `<img>` style fetches authenticate.
pub fn media_url(
    base: &Url,
    mxc_uri: &str,
    encrypted: bool,
    image_auth_token: Option<&str>,
) -> Result<Url, StoreError> {
    let locator = MediaLocator::parse(mxc_uri)?;
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::InvalidMediaUri(base.to_string()))?
        .pop_if_empty()
        .extend([
            "media",
            locator.server_name.as_str(),
            locator.media_id.as_str(),
        ]);

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if encrypted {
            query.append_pair("encrypted", "true");
        }
        if let Some(token) = image_auth_token {
            query.append_pair("image_auth", token);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}
