//! ---
//! berth_section: "05-external-interfaces"
//! berth_subsection: "module"
//! berth_type: "source"
//! berth_scope: "code"
//! berth_description: "Container runtime control-plane capability."
//! berth_version: "v0.0.0-prealpha"
//! berth_owner: "tbd"
//! ---
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::client::RuntimeClient;
use crate::error::{ResourceKind, Result, RuntimeError};
use crate::types::{
    ContainerConfig, ContainerInspect, ContainerSummary, EndpointConfig, HostConfig, ListOptions,
    NetworkCreateOptions, NetworkInspect, RemoveOptions, StopOptions,
};
use crate::wire::{
    ContainerCreateRequest, ContainerInspectResponse, ContainerListEntry, ErrorResponse,
    IdResponse, NetworkConnectRequest, NetworkCreateRequest, NetworkDisconnectRequest,
    NetworkInspectResponse, PullProgress, WireEndpointConfig,
};

/// Authority used in request lines sent over a Unix socket.
#[cfg(unix)]
const SOCKET_AUTHORITY: &str = "http://localhost/";

/// [`RuntimeClient`] speaking the Docker Engine HTTP API over a Unix socket or TCP.
#[derive(Debug, Clone)]
pub struct EngineClient {
    transport: Transport,
    base: Url,
}

#[derive(Debug, Clone)]
enum Transport {
    Http(reqwest::Client),
    #[cfg(unix)]
    Socket { path: PathBuf, timeout: Duration },
}

/// Where a `docker_host` string points.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EngineHost {
    Http(Url),
    #[cfg(unix)]
    Socket(PathBuf),
}

/// Status and fully buffered body of one engine response.
#[derive(Debug)]
struct EngineResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl EngineResponse {
    fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|err| RuntimeError::Transport(format!("malformed engine response: {err}")))
    }

    fn into_success(self, kind: ResourceKind, subject: &str) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(self.error(kind, subject))
        }
    }

    /// Map a non-success response onto the runtime error taxonomy.
    fn error(&self, kind: ResourceKind, subject: &str) -> RuntimeError {
        let message = serde_json::from_slice::<ErrorResponse>(&self.body)
            .map(|body| body.message)
            .unwrap_or_default();
        classify(self.status, message, kind, subject)
    }
}

impl EngineClient {
    /// Build a client for `host` (`unix://`, `tcp://`, `http://` or `https://`).
    pub fn new(host: &str, api_version: &str, timeout: Duration) -> Result<Self> {
        let (transport, root) = match parse_host(host)? {
            EngineHost::Http(root) => {
                let http = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|err| {
                        RuntimeError::Transport(format!("unable to build http client: {err}"))
                    })?;
                (Transport::Http(http), root)
            }
            #[cfg(unix)]
            EngineHost::Socket(path) => {
                let root = Url::parse(SOCKET_AUTHORITY)
                    .map_err(|err| RuntimeError::Transport(err.to_string()))?;
                (Transport::Socket { path, timeout }, root)
            }
        };
        let base = versioned(&root, api_version)?;
        debug!(base = %base, socket = ?transport.socket_path(), "engine client configured");
        Ok(Self { transport, base })
    }

    /// Base URL every request is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Socket the client dials, when the engine is reached over a Unix socket.
    #[cfg(unix)]
    pub fn socket_path(&self) -> Option<&Path> {
        self.transport.socket_path()
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| RuntimeError::Transport(format!("invalid request path {path}: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (*key, value.as_str())));
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<EngineResponse> {
        let url = self.url(path, query)?;
        self.transport.send(method, url, None).await
    }

    async fn call_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<EngineResponse> {
        let url = self.url(path, query)?;
        let payload = serde_json::to_vec(body)
            .map_err(|err| RuntimeError::Transport(format!("unable to encode request: {err}")))?;
        self.transport.send(method, url, Some(payload)).await
    }
}

impl Transport {
    #[cfg(unix)]
    fn socket_path(&self) -> Option<&Path> {
        match self {
            Transport::Http(_) => None,
            Transport::Socket { path, .. } => Some(path),
        }
    }

    #[cfg(not(unix))]
    fn socket_path(&self) -> Option<&str> {
        None
    }

    async fn send(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> Result<EngineResponse> {
        match self {
            Transport::Http(http) => {
                let mut builder = http.request(method, url);
                if let Some(payload) = body {
                    builder = builder
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(payload);
                }
                let response = builder
                    .send()
                    .await
                    .map_err(|err| RuntimeError::Transport(err.to_string()))?;
                let status = response.status();
                let body = response
                    .bytes()
                    .await
                    .map_err(|err| RuntimeError::Transport(err.to_string()))?;
                Ok(EngineResponse {
                    status,
                    body: body.to_vec(),
                })
            }
            #[cfg(unix)]
            Transport::Socket { path, timeout } => {
                tokio::time::timeout(*timeout, socket_roundtrip(path, method, &url, body))
                    .await
                    .map_err(|_| {
                        RuntimeError::Transport(format!(
                            "engine at {} did not answer within {timeout:?}",
                            path.display()
                        ))
                    })?
            }
        }
    }
}

/// One HTTP/1.1 exchange on a fresh connection to the engine socket.
#[cfg(unix)]
async fn socket_roundtrip(
    path: &Path,
    method: Method,
    url: &Url,
    body: Option<Vec<u8>>,
) -> Result<EngineResponse> {
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::header::{CONTENT_TYPE, HOST};
    use hyper::Request;
    use hyper_util::rt::TokioIo;
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path).await.map_err(|err| {
        RuntimeError::Transport(format!(
            "failed to connect to engine at {}: {err}",
            path.display()
        ))
    })?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|err| RuntimeError::Transport(format!("http handshake failed: {err}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(error = %err, "engine connection closed");
        }
    });

    let mut request = Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(HOST, "localhost");
    let payload = match body {
        Some(bytes) => {
            request = request.header(CONTENT_TYPE, "application/json");
            Bytes::from(bytes)
        }
        None => Bytes::new(),
    };
    let request = request
        .body(Full::new(payload))
        .map_err(|err| RuntimeError::Transport(format!("failed to build request: {err}")))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|err| RuntimeError::Transport(format!("failed to send request: {err}")))?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| RuntimeError::Transport(format!("failed to read response: {err}")))?
        .to_bytes();
    Ok(EngineResponse {
        status,
        body: body.to_vec(),
    })
}

/// Classify a daemon host string.
pub(crate) fn parse_host(host: &str) -> Result<EngineHost> {
    let trimmed = host.trim();
    if let Some(path) = trimmed.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(RuntimeError::Transport(format!(
                "docker host {trimmed} names no socket"
            )));
        }
        return socket_host(trimmed, path);
    }
    let http_form = if let Some(rest) = trimmed.strip_prefix("tcp://") {
        format!("http://{rest}")
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        return Err(RuntimeError::Transport(format!(
            "unrecognised docker host {trimmed}"
        )));
    };
    Url::parse(&http_form)
        .map(EngineHost::Http)
        .map_err(|err| RuntimeError::Transport(format!("invalid docker host {trimmed}: {err}")))
}

#[cfg(unix)]
fn socket_host(_host: &str, path: &str) -> Result<EngineHost> {
    Ok(EngineHost::Socket(PathBuf::from(path)))
}

#[cfg(not(unix))]
fn socket_host(host: &str, _path: &str) -> Result<EngineHost> {
    Err(RuntimeError::Transport(format!(
        "unix socket host {host} is not available on this platform"
    )))
}

fn versioned(root: &Url, api_version: &str) -> Result<Url> {
    root.join(&format!("{}/", api_version.trim_matches('/')))
        .map_err(|err| RuntimeError::Transport(format!("invalid api version {api_version}: {err}")))
}

/// Split an image reference into the `fromImage`/`tag` pair the pull endpoint expects.
pub(crate) fn split_reference(reference: &str) -> (&str, Option<&str>) {
    if reference.contains('@') {
        return (reference, None);
    }
    let last_segment_start = reference.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match reference[last_segment_start..].rfind(':') {
        Some(offset) => {
            let split = last_segment_start + offset;
            (&reference[..split], Some(&reference[split + 1..]))
        }
        None => (reference, Some("latest")),
    }
}

pub(crate) fn classify(
    status: StatusCode,
    message: String,
    kind: ResourceKind,
    subject: &str,
) -> RuntimeError {
    match status {
        StatusCode::NOT_FOUND => RuntimeError::NotFound {
            kind,
            id: subject.to_owned(),
        },
        StatusCode::CONFLICT => RuntimeError::Conflict {
            kind,
            name: subject.to_owned(),
        },
        _ => RuntimeError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RuntimeClient for EngineClient {
    async fn pull_image(&self, reference: &str) -> Result<()> {
        let (image, tag) = split_reference(reference);
        let mut query = vec![("fromImage", image.to_owned())];
        if let Some(tag) = tag {
            query.push(("tag", tag.to_owned()));
        }
        let response = self
            .call(Method::POST, "images/create", &query)
            .await?
            .into_success(ResourceKind::Image, reference)?;
        // Pull failures are reported inside the 200 progress stream.
        let body = String::from_utf8_lossy(&response.body);
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            if let Ok(PullProgress { error: Some(error) }) = serde_json::from_str::<PullProgress>(line) {
                return Err(RuntimeError::Api {
                    status: 500,
                    message: error,
                });
            }
        }
        debug!(image = reference, "image pulled");
        Ok(())
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
        host_config: &HostConfig,
        name: &str,
    ) -> Result<String> {
        let response = self
            .call_json(
                Method::POST,
                "containers/create",
                &[("name", name.to_owned())],
                &ContainerCreateRequest::new(config, host_config),
            )
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            // The engine answers 404 when the image is missing locally.
            return Err(RuntimeError::NotFound {
                kind: ResourceKind::Image,
                id: config.image.clone(),
            });
        }
        let response = response.into_success(ResourceKind::Container, name)?;
        Ok(response.decode::<IdResponse>()?.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let response = self
            .call(Method::POST, &format!("containers/{id}/start"), &[])
            .await?;
        if response.status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        response.into_success(ResourceKind::Container, id)?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let response = self
            .call(Method::GET, &format!("containers/{id}/json"), &[])
            .await?
            .into_success(ResourceKind::Container, id)?;
        Ok(response.decode::<ContainerInspectResponse>()?.into())
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<()> {
        let response = self
            .call(
                Method::POST,
                &format!("containers/{id}/rename"),
                &[("name", new_name.to_owned())],
            )
            .await?;
        if response.status == StatusCode::CONFLICT {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Container,
                name: new_name.to_owned(),
            });
        }
        response.into_success(ResourceKind::Container, id)?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, options: &StopOptions) -> Result<()> {
        let query: Vec<_> = options
            .timeout
            .map(|timeout| ("t", timeout.as_secs().to_string()))
            .into_iter()
            .collect();
        let response = self
            .call(Method::POST, &format!("containers/{id}/stop"), &query)
            .await?;
        if response.status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        response.into_success(ResourceKind::Container, id)?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: &RemoveOptions) -> Result<()> {
        let query = [
            ("v", options.remove_volumes.to_string()),
            ("force", options.force.to_string()),
        ];
        self.call(Method::DELETE, &format!("containers/{id}"), &query)
            .await?
            .into_success(ResourceKind::Container, id)?;
        Ok(())
    }

    async fn list_containers(&self, options: &ListOptions) -> Result<Vec<ContainerSummary>> {
        let response = self
            .call(Method::GET, "containers/json", &[("all", options.all.to_string())])
            .await?
            .into_success(ResourceKind::Container, "*")?;
        let entries = response.decode::<Vec<ContainerListEntry>>()?;
        Ok(entries.into_iter().map(ContainerSummary::from).collect())
    }

    async fn create_network(&self, name: &str, options: &NetworkCreateOptions) -> Result<String> {
        let response = self
            .call_json(
                Method::POST,
                "networks/create",
                &[],
                &NetworkCreateRequest::new(name, options),
            )
            .await?
            .into_success(ResourceKind::Network, name)?;
        Ok(response.decode::<IdResponse>()?.id)
    }

    async fn inspect_network(&self, id: &str) -> Result<NetworkInspect> {
        let response = self
            .call(Method::GET, &format!("networks/{id}"), &[])
            .await?
            .into_success(ResourceKind::Network, id)?;
        Ok(response.decode::<NetworkInspectResponse>()?.into())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.call(Method::DELETE, &format!("networks/{id}"), &[])
            .await?
            .into_success(ResourceKind::Network, id)?;
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        container_id: &str,
        endpoint: Option<&EndpointConfig>,
    ) -> Result<()> {
        let request = NetworkConnectRequest {
            container: container_id.to_owned(),
            endpoint_config: WireEndpointConfig {
                aliases: endpoint.map(|e| e.aliases.clone()).unwrap_or_default(),
            },
        };
        self.call_json(
            Method::POST,
            &format!("networks/{network_id}/connect"),
            &[],
            &request,
        )
        .await?
        .into_success(ResourceKind::Network, network_id)?;
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network_id: &str,
        container_id: &str,
        force: bool,
    ) -> Result<()> {
        let request = NetworkDisconnectRequest {
            container: container_id.to_owned(),
            force,
        };
        let response = self
            .call_json(
                Method::POST,
                &format!("networks/{network_id}/disconnect"),
                &[],
                &request,
            )
            .await?;
        if response.status.is_success() {
            return Ok(());
        }
        match response.error(ResourceKind::Network, network_id) {
            RuntimeError::Api { message, .. } if message.contains("is not connected") => {
                Err(RuntimeError::NotConnected {
                    network: network_id.to_owned(),
                    container: container_id.to_owned(),
                })
            }
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_base(host: &str, api_version: &str) -> Url {
        match parse_host(host).unwrap() {
            EngineHost::Http(root) => versioned(&root, api_version).unwrap(),
            #[cfg(unix)]
            other => panic!("expected an http host, got {other:?}"),
        }
    }

    #[test]
    fn tcp_host_becomes_versioned_http_base() {
        let url = http_base("tcp://10.0.0.5:2375", "v1.43");
        assert_eq!(url.as_str(), "http://10.0.0.5:2375/v1.43/");
        assert_eq!(
            url.join("containers/abc/json").unwrap().as_str(),
            "http://10.0.0.5:2375/v1.43/containers/abc/json"
        );
    }

    #[test]
    fn https_host_is_kept() {
        let url = http_base("https://docker.internal:2376", "v1.41");
        assert_eq!(url.as_str(), "https://docker.internal:2376/v1.41/");
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(parse_host("ssh://host").is_err());
        assert!(parse_host("npipe:////./pipe/docker_engine").is_err());
        assert!(parse_host("unix://").is_err());
    }

    #[test]
    fn query_is_appended_to_versioned_path() {
        let client =
            EngineClient::new("tcp://127.0.0.1:2375", "v1.43", Duration::from_secs(1)).unwrap();
        let url = client
            .url(
                "containers/web1",
                &[("v", true.to_string()), ("force", false.to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:2375/v1.43/containers/web1?v=true&force=false"
        );
    }

    #[test]
    fn references_split_into_image_and_tag() {
        assert_eq!(split_reference("nginx:1.25"), ("nginx", Some("1.25")));
        assert_eq!(split_reference("nginx"), ("nginx", Some("latest")));
        assert_eq!(
            split_reference("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", Some("latest"))
        );
        assert_eq!(
            split_reference("registry.local:5000/team/app:2.0"),
            ("registry.local:5000/team/app", Some("2.0"))
        );
        assert_eq!(
            split_reference("alpine@sha256:abcd"),
            ("alpine@sha256:abcd", None)
        );
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(
            classify(StatusCode::NOT_FOUND, String::new(), ResourceKind::Container, "c1"),
            RuntimeError::NotFound {
                kind: ResourceKind::Container,
                id: "c1".into()
            }
        );
        assert_eq!(
            classify(StatusCode::CONFLICT, String::new(), ResourceKind::Network, "web"),
            RuntimeError::Conflict {
                kind: ResourceKind::Network,
                name: "web".into()
            }
        );
        assert_eq!(
            classify(
                StatusCode::INTERNAL_SERVER_ERROR,
                "boom".into(),
                ResourceKind::Network,
                "web"
            ),
            RuntimeError::Api {
                status: 500,
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_engine_is_a_transport_error() {
        let client =
            EngineClient::new("tcp://127.0.0.1:9", "v1.43", Duration::from_millis(200)).unwrap();
        let err = client.inspect_network("frontend").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Transport(_)));
    }

    #[cfg(unix)]
    mod socket {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::UnixListener;
        use tokio::task::JoinHandle;

        /// Answer exactly one request on `path` and hand back its head.
        fn serve_once(path: &Path, status: &str, body: &str) -> JoinHandle<String> {
            let listener = UnixListener::bind(path).unwrap();
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                    let read = stream.read(&mut chunk).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    head.extend_from_slice(&chunk[..read]);
                }
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.flush().await.unwrap();
                String::from_utf8_lossy(&head).into_owned()
            })
        }

        #[test]
        fn unix_host_builds_socket_client() {
            let client = EngineClient::new(
                "unix:///var/run/docker.sock",
                "v1.43",
                Duration::from_secs(5),
            )
            .unwrap();
            assert_eq!(
                client.socket_path(),
                Some(Path::new("/var/run/docker.sock"))
            );
            assert_eq!(client.base_url().as_str(), "http://localhost/v1.43/");
        }

        #[test]
        fn tcp_client_has_no_socket() {
            let client =
                EngineClient::new("tcp://127.0.0.1:2375", "v1.43", Duration::from_secs(5))
                    .unwrap();
            assert_eq!(client.socket_path(), None);
        }

        #[tokio::test]
        async fn requests_travel_over_the_socket() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engine.sock");
            let server = serve_once(
                &path,
                "200 OK",
                r#"{"Id":"net1","Name":"frontend","Driver":"bridge"}"#,
            );
            let host = format!("unix://{}", path.display());
            let client = EngineClient::new(&host, "v1.43", Duration::from_secs(5)).unwrap();

            let network = client.inspect_network("frontend").await.unwrap();
            assert_eq!(network.id, "net1");
            assert_eq!(network.driver, "bridge");

            let head = server.await.unwrap();
            assert!(head.contains("/v1.43/networks/frontend"), "request head: {head}");
        }

        #[tokio::test]
        async fn socket_errors_use_the_same_taxonomy() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engine.sock");
            let server = serve_once(&path, "404 Not Found", r#"{"message":"no such network"}"#);
            let host = format!("unix://{}", path.display());
            let client = EngineClient::new(&host, "v1.43", Duration::from_secs(5)).unwrap();

            let err = client.remove_network("ghost").await.unwrap_err();
            assert_eq!(
                err,
                RuntimeError::NotFound {
                    kind: ResourceKind::Network,
                    id: "ghost".into()
                }
            );
            server.await.unwrap();
        }

        #[tokio::test]
        async fn missing_socket_is_a_transport_error() {
            let dir = tempfile::tempdir().unwrap();
            let host = format!("unix://{}", dir.path().join("absent.sock").display());
            let client = EngineClient::new(&host, "v1.43", Duration::from_secs(1)).unwrap();
            let err = client.inspect_network("frontend").await.unwrap_err();
            assert!(matches!(err, RuntimeError::Transport(msg) if msg.contains("failed to connect")));
        }
    }
}
