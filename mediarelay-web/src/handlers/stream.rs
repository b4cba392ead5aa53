//! File download handler with Range support

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Extensions, HeaderMap, Method, Response, StatusCode, header};
use mediarelay_core::streaming::NeverDisconnected;
use mediarelay_core::{ByteRange, RequesterKey};
use serde::Deserialize;

use super::media::MediaHeaders;
use crate::error::ApiError;
use crate::server::AppState;

/// Path parameters of `/dl/{chat_id}/{message_id}[/{name}]`.
///
/// The trailing name is cosmetic: it lets players show a file name.
#[derive(Debug, Deserialize)]
pub struct FilePath {
    pub chat_id: i64,
    pub message_id: i32,
    #[serde(default)]
    pub name: Option<String>,
}

/// Serves a message's file, or the part of it named by the Range header.
///
/// HEAD answers with the same headers and never starts a stream.
///
/// # Errors
///
/// - `ApiError::Stream` - File missing (404), lookup failure (502) or bad range (400/416)
/// - `ApiError::InvalidHeader` - Range header is not valid ASCII
pub async fn stream_file(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<FilePath>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Response<Body>, ApiError> {
    let relay = &state.relay;
    let worker = relay.least_loaded_worker();
    let descriptor = relay
        .describe(worker, path.chat_id, path.message_id)
        .await?;

    let range = match headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::InvalidHeader { name: "Range" })?;
            Some(ByteRange::parse(value, descriptor.file_size)?)
        }
        None => None,
    };

    let file_size = descriptor.file_size;
    let content_length = range.map_or(file_size, |range| range.len());
    let media = MediaHeaders::for_descriptor(&descriptor);

    let mut response = Response::builder()
        .header(header::CONTENT_TYPE, &media.mime_type)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::CONTENT_DISPOSITION, media.content_disposition())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CACHE_CONTROL,
            format!(
                "public, max-age={}, immutable",
                state.cache_max_age.as_secs()
            ),
        )
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Content-Length, Content-Range, Accept-Ranges",
        );

    response = match range {
        Some(range) => response.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.start, range.end, file_size),
        ),
        None => response.status(StatusCode::OK),
    };

    if method == Method::HEAD {
        return Ok(response.body(Body::empty())?);
    }

    let requester = requester_key(&extensions);
    tracing::info!(
        "Serving {} bytes of message {} in chat {} to {} via worker {}",
        content_length,
        path.message_id,
        path.chat_id,
        requester,
        worker
    );

    let stream = relay
        .stream_descriptor(
            descriptor,
            range,
            requester,
            worker,
            Arc::new(NeverDisconnected),
        )
        .await?;

    Ok(response.body(Body::from_stream(stream))?)
}

/// One active stream per client IP, whatever file it asks for.
fn requester_key(extensions: &Extensions) -> RequesterKey {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| RequesterKey::from(addr.ip()))
        .unwrap_or_else(|| RequesterKey::from("unknown"))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn test_requester_key_uses_client_ip_only() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            53_211,
        )));

        assert_eq!(requester_key(&extensions).as_str(), "192.168.1.20");
    }

    #[test]
    fn test_requester_key_without_connection_info() {
        assert_eq!(requester_key(&Extensions::new()).as_str(), "unknown");
    }
}
