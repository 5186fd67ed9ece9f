//! Firecracker API client
use crate::dto;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, Response, StatusCode, Uri,
    body::{Bytes, Incoming},
};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri};
use paste::paste;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FirecrackerApiClient {
    client: Client<UnixConnector, Full<Bytes>>,
    socket_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Hyper http error: {0}")]
    HyperHttp(#[from] hyper::http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Request error: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Firecracker API error {status}: {body}")]
    Vmm { status: StatusCode, body: String },
}

impl FirecrackerApiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::unix(),
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Callers pass the control resource path; the socket path is encoded
    /// into the URI authority by the transport.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Full<Bytes>,
    ) -> Result<Response<Incoming>, ApiError> {
        let url: Uri = UnixUri::new(&self.socket_path, path).into();

        let req = Request::builder()
            .method(method)
            .uri(url)
            .header("Content-Type", "application/json")
            .body(body)?;

        let response = self.client.request(req).await?;
        Ok(response)
    }

    /// Any status >= 400 is surfaced with the raw body text. No retry:
    /// the caller decides.
    async fn check_response(&self, response: Response<Incoming>) -> Result<(), ApiError> {
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if status.as_u16() >= 400 {
            return Err(ApiError::Vmm {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(())
    }

    async fn put<T: Serialize>(&self, path: &str, req: &T) -> Result<(), ApiError> {
        let body = serde_json::to_vec(req)?;
        let response = self.request(Method::PUT, path, body.into()).await?;
        self.check_response(response).await
    }

    async fn patch<T: Serialize>(&self, path: &str, req: &T) -> Result<(), ApiError> {
        let body = serde_json::to_vec(req)?;
        let response = self.request(Method::PATCH, path, body.into()).await?;
        self.check_response(response).await
    }
}

macro_rules! api_methods {
    (
        $(
            $method:ident $path:literal
            as $fn_name:ident
            ($param_name:ident: $param:tt)
        );* $(;)?
    ) => {
        impl FirecrackerApiClient {
            $(
                paste! {
                    pub async fn $fn_name(
                        &self,
                        $param_name: &dto::$param,
                    ) -> Result<(), ApiError> {
                        self.[<$method:lower>]($path, $param_name).await
                    }
                }
            )*
        }
    };
}

api_methods!(
    PUT "/boot-source" as put_boot_source (boot_source: BootSource);
    PUT "/machine-config" as put_machine_config (machine_config: MachineConfiguration);
    PUT "/actions" as put_actions (action: InstanceActionInfo);
    PATCH "/vm" as patch_vm (vm: Vm);
    PUT "/snapshot/create" as put_snapshot_create (options: SnapshotCreateParams);
    PUT "/snapshot/load" as put_snapshot_load (options: SnapshotLoadParams);

    // PARAMETERIZED ROUTES, IMPLEMENT MANUALLY
    // [*] PUT "/drives/{drive_id}" (drive: Drive);
    // [*] PUT "/network-interfaces/{iface_id}" (interface: NetworkInterface);
);

impl FirecrackerApiClient {
    pub async fn put_drive(&self, drive: &dto::Drive) -> Result<(), ApiError> {
        let encoded_id = utf8_percent_encode(&drive.drive_id, NON_ALPHANUMERIC);
        self.put(format!("/drives/{}", encoded_id).as_str(), drive)
            .await
    }

    pub async fn put_network_interface(
        &self,
        interface: &dto::NetworkInterface,
    ) -> Result<(), ApiError> {
        let encoded_id = utf8_percent_encode(&interface.iface_id, NON_ALPHANUMERIC);
        self.put(
            format!("/network-interfaces/{}", encoded_id).as_str(),
            interface,
        )
        .await
    }
}
