//! Azure Resource Manager REST client
//!
//! [`ArmClient`] implements every capability trait against the ARM REST API.
//! Requests carry an OAuth2 client-credentials token that is cached until
//! shortly before it expires. Throttled and failed requests are retried with
//! jittered backoff; long-running operations are polled until they reach a
//! terminal state, honouring `Retry-After`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::ClientAuth;
use crate::cloud::CloudConfiguration;
use crate::error::{AzureError, Result};
use crate::factory::{
    AvailabilitySets, BlobContainers, Factory, FactoryProvider, ManagedIdentities, NatGateways,
    PublicIps, ResourceGroups, RouteTables, SecurityGroups, StorageAccounts, Subnets,
    VirtualNetworks,
};
use crate::models::{
    self, AvailabilitySet, BlobContainer, Identity, NatGateway, PublicIpAddress, ResourceGroup,
    RouteTable, SecurityGroup, StorageAccount, Subnet, Tags, VirtualNetwork,
};
use crate::retry::{retry_with_backoff, RetryConfig};

const RESOURCES_API_VERSION: &str = "2021-04-01";
const NETWORK_API_VERSION: &str = "2023-09-01";
const COMPUTE_API_VERSION: &str = "2023-09-01";
const MSI_API_VERSION: &str = "2023-01-31";
const STORAGE_API_VERSION: &str = "2023-01-01";

const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for a single long-running operation
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Default, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollKind {
    /// `Azure-AsyncOperation` URL answering with a status document
    AsyncOperation,
    /// `Location` URL answering 202 until done
    Location,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingOperation {
    url: String,
    kind: PollKind,
    retry_after: Option<Duration>,
}

impl PendingOperation {
    fn from_headers(status: StatusCode, headers: &HeaderMap) -> Option<Self> {
        if status != StatusCode::CREATED && status != StatusCode::ACCEPTED {
            return None;
        }
        let retry_after = parse_retry_after(headers);
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Some(url) = header(ASYNC_OPERATION_HEADER) {
            return Some(Self {
                url,
                kind: PollKind::AsyncOperation,
                retry_after,
            });
        }
        header(LOCATION.as_str()).map(|url| Self {
            url,
            kind: PollKind::Location,
            retry_after,
        })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_from_response(response: reqwest::Response) -> AzureError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) => AzureError::response(status.as_u16(), envelope.error.code, envelope.error.message),
        Err(_) => AzureError::response(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown").replace(' ', ""),
            text,
        ),
    }
}

/// REST client bound to one subscription of one cloud instance
pub struct ArmClient {
    http: reqwest::Client,
    auth: ClientAuth,
    cloud: CloudConfiguration,
    token: Mutex<Option<CachedToken>>,
    retry: RetryConfig,
    operation_timeout: Duration,
}

impl ArmClient {
    pub fn new(auth: ClientAuth, cloud: CloudConfiguration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            auth,
            cloud,
            token: Mutex::new(None),
            retry: RetryConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn bearer(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.cloud.authority_host, self.auth.tenant_id
        );
        let scope = self.cloud.token_scope();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.auth.client_id.as_str()),
            ("client_secret", self.auth.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];
        let response = self.http.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body: TokenError = response.json().await.unwrap_or_default();
            return Err(AzureError::Authentication(format!(
                "token request failed with status {}: {} {}",
                status, body.error, body.error_description
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!("Acquired ARM token valid for {}s", token.expires_in);
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.cloud.resource_manager, path, api_version
        )
    }

    fn resource_path(&self, resource_group: &str, resource_type: &str, name: &str) -> String {
        models::resource_id(&self.auth.subscription_id, resource_group, resource_type, name)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.bearer().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let operation = format!("{} {}", method, url);
        retry_with_backoff(&self.retry, &operation, AzureError::is_transient, || {
            self.execute(method.clone(), url, body.as_ref())
        })
        .await
    }

    async fn get_resource<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> Result<Option<T>> {
        match self.send(Method::GET, &self.url(path, api_version), None).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_resources<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path, api_version));
        while let Some(url) = next {
            let page: ListResult<T> = self.send(Method::GET, &url, None).await?.json().await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    async fn put_resource<B, T>(&self, path: &str, api_version: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!("PUT {}", path);
        let body = serde_json::to_value(body)?;
        let response = self
            .send(Method::PUT, &self.url(path, api_version), Some(body))
            .await?;
        match PendingOperation::from_headers(response.status(), response.headers()) {
            Some(pending) => {
                self.wait(path, pending).await?;
                self.get_resource(path, api_version).await?.ok_or_else(|| {
                    AzureError::response(404, "ResourceNotFound", format!("{} not found after update", path))
                })
            }
            None => Ok(response.json().await?),
        }
    }

    async fn delete_resource(&self, path: &str, api_version: &str) -> Result<()> {
        debug!("DELETE {}", path);
        let response = match self
            .send(Method::DELETE, &self.url(path, api_version), None)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(pending) = PendingOperation::from_headers(response.status(), response.headers()) {
            self.wait(path, pending).await?;
        }
        Ok(())
    }

    /// Poll a long-running operation until it succeeds, fails or times out
    async fn wait(&self, operation: &str, pending: PendingOperation) -> Result<()> {
        let deadline = Instant::now() + self.operation_timeout;
        let mut backoff = RetryConfig::polling().backoff();
        let mut retry_after = pending.retry_after;

        loop {
            let delay = retry_after.take().unwrap_or_else(|| backoff.next_delay());
            if Instant::now() + delay > deadline {
                return Err(AzureError::OperationTimeout(operation.to_string()));
            }
            tokio::time::sleep(delay).await;

            let response = self.send(Method::GET, &pending.url, None).await?;
            retry_after = parse_retry_after(response.headers());
            if response.status() == StatusCode::ACCEPTED {
                continue;
            }
            if pending.kind == PollKind::Location {
                return Ok(());
            }

            let status: OperationStatus = response.json().await?;
            match status.status.as_str() {
                "Succeeded" => {
                    debug!("Operation on {} succeeded", operation);
                    return Ok(());
                }
                "Failed" | "Canceled" => {
                    let error = status.error.unwrap_or_default();
                    return Err(AzureError::OperationFailed {
                        operation: operation.to_string(),
                        status: status.status,
                        message: format!("{}: {}", error.code, error.message),
                    });
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl ResourceGroups for ArmClient {
    async fn get(&self, name: &str) -> Result<Option<ResourceGroup>> {
        let path = models::resource_group_id(&self.auth.subscription_id, name);
        self.get_resource(&path, RESOURCES_API_VERSION).await
    }

    async fn create_or_update(&self, name: &str, location: &str, tags: Tags) -> Result<ResourceGroup> {
        let path = models::resource_group_id(&self.auth.subscription_id, name);
        let group = ResourceGroup {
            location: location.to_string(),
            tags,
            ..Default::default()
        };
        self.put_resource(&path, RESOURCES_API_VERSION, &group).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = models::resource_group_id(&self.auth.subscription_id, name);
        self.delete_resource(&path, RESOURCES_API_VERSION).await
    }
}

#[async_trait]
impl VirtualNetworks for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>> {
        let path = self.resource_path(resource_group, models::VIRTUAL_NETWORK_TYPE, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        vnet: VirtualNetwork,
    ) -> Result<VirtualNetwork> {
        let path = self.resource_path(resource_group, models::VIRTUAL_NETWORK_TYPE, name);
        self.put_resource(&path, NETWORK_API_VERSION, &vnet).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::VIRTUAL_NETWORK_TYPE, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl Subnets for ArmClient {
    async fn get(&self, resource_group: &str, vnet: &str, name: &str) -> Result<Option<Subnet>> {
        let path = models::subnet_id(&self.auth.subscription_id, resource_group, vnet, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn list(&self, resource_group: &str, vnet: &str) -> Result<Vec<Subnet>> {
        let path = format!(
            "{}/subnets",
            self.resource_path(resource_group, models::VIRTUAL_NETWORK_TYPE, vnet)
        );
        self.list_resources(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        subnet: Subnet,
    ) -> Result<Subnet> {
        let path = models::subnet_id(&self.auth.subscription_id, resource_group, vnet, name);
        self.put_resource(&path, NETWORK_API_VERSION, &subnet).await
    }

    async fn delete(&self, resource_group: &str, vnet: &str, name: &str) -> Result<()> {
        let path = models::subnet_id(&self.auth.subscription_id, resource_group, vnet, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl RouteTables for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<RouteTable>> {
        let path = self.resource_path(resource_group, models::ROUTE_TABLE_TYPE, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        table: RouteTable,
    ) -> Result<RouteTable> {
        let path = self.resource_path(resource_group, models::ROUTE_TABLE_TYPE, name);
        self.put_resource(&path, NETWORK_API_VERSION, &table).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::ROUTE_TABLE_TYPE, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl SecurityGroups for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<SecurityGroup>> {
        let path = self.resource_path(resource_group, models::SECURITY_GROUP_TYPE, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        group: SecurityGroup,
    ) -> Result<SecurityGroup> {
        let path = self.resource_path(resource_group, models::SECURITY_GROUP_TYPE, name);
        self.put_resource(&path, NETWORK_API_VERSION, &group).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::SECURITY_GROUP_TYPE, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl PublicIps for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<PublicIpAddress>> {
        let path = self.resource_path(resource_group, models::PUBLIC_IP_TYPE, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        ip: PublicIpAddress,
    ) -> Result<PublicIpAddress> {
        let path = self.resource_path(resource_group, models::PUBLIC_IP_TYPE, name);
        self.put_resource(&path, NETWORK_API_VERSION, &ip).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::PUBLIC_IP_TYPE, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl NatGateways for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<NatGateway>> {
        let path = self.resource_path(resource_group, models::NAT_GATEWAY_TYPE, name);
        self.get_resource(&path, NETWORK_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        gateway: NatGateway,
    ) -> Result<NatGateway> {
        let path = self.resource_path(resource_group, models::NAT_GATEWAY_TYPE, name);
        self.put_resource(&path, NETWORK_API_VERSION, &gateway).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::NAT_GATEWAY_TYPE, name);
        self.delete_resource(&path, NETWORK_API_VERSION).await
    }
}

#[async_trait]
impl AvailabilitySets for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<AvailabilitySet>> {
        let path = self.resource_path(resource_group, models::AVAILABILITY_SET_TYPE, name);
        self.get_resource(&path, COMPUTE_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        set: AvailabilitySet,
    ) -> Result<AvailabilitySet> {
        let path = self.resource_path(resource_group, models::AVAILABILITY_SET_TYPE, name);
        self.put_resource(&path, COMPUTE_API_VERSION, &set).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::AVAILABILITY_SET_TYPE, name);
        self.delete_resource(&path, COMPUTE_API_VERSION).await
    }
}

#[async_trait]
impl ManagedIdentities for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<Identity>> {
        let path = self.resource_path(resource_group, models::IDENTITY_TYPE, name);
        self.get_resource(&path, MSI_API_VERSION).await
    }
}

#[async_trait]
impl StorageAccounts for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<StorageAccount>> {
        let path = self.resource_path(resource_group, models::STORAGE_ACCOUNT_TYPE, name);
        self.get_resource(&path, STORAGE_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        account: StorageAccount,
    ) -> Result<StorageAccount> {
        let path = self.resource_path(resource_group, models::STORAGE_ACCOUNT_TYPE, name);
        self.put_resource(&path, STORAGE_API_VERSION, &account).await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let path = self.resource_path(resource_group, models::STORAGE_ACCOUNT_TYPE, name);
        self.delete_resource(&path, STORAGE_API_VERSION).await
    }
}

impl ArmClient {
    fn container_path(&self, resource_group: &str, account: &str, name: &str) -> String {
        format!(
            "{}/blobServices/default/containers/{}",
            self.resource_path(resource_group, models::STORAGE_ACCOUNT_TYPE, account),
            name
        )
    }
}

#[async_trait]
impl BlobContainers for ArmClient {
    async fn get(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<Option<BlobContainer>> {
        let path = self.container_path(resource_group, account, name);
        self.get_resource(&path, STORAGE_API_VERSION).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
        container: BlobContainer,
    ) -> Result<BlobContainer> {
        let path = self.container_path(resource_group, account, name);
        self.put_resource(&path, STORAGE_API_VERSION, &container).await
    }

    async fn delete(&self, resource_group: &str, account: &str, name: &str) -> Result<()> {
        let path = self.container_path(resource_group, account, name);
        self.delete_resource(&path, STORAGE_API_VERSION).await
    }
}

/// Factory handing out the same [`ArmClient`] for every capability
#[derive(Clone)]
pub struct ArmFactory {
    client: Arc<ArmClient>,
}

impl ArmFactory {
    pub fn new(client: ArmClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Factory for ArmFactory {
    fn subscription_id(&self) -> &str {
        &self.client.auth.subscription_id
    }

    fn resource_groups(&self) -> Arc<dyn ResourceGroups> {
        self.client.clone()
    }

    fn virtual_networks(&self) -> Arc<dyn VirtualNetworks> {
        self.client.clone()
    }

    fn subnets(&self) -> Arc<dyn Subnets> {
        self.client.clone()
    }

    fn route_tables(&self) -> Arc<dyn RouteTables> {
        self.client.clone()
    }

    fn security_groups(&self) -> Arc<dyn SecurityGroups> {
        self.client.clone()
    }

    fn public_ips(&self) -> Arc<dyn PublicIps> {
        self.client.clone()
    }

    fn nat_gateways(&self) -> Arc<dyn NatGateways> {
        self.client.clone()
    }

    fn availability_sets(&self) -> Arc<dyn AvailabilitySets> {
        self.client.clone()
    }

    fn managed_identities(&self) -> Arc<dyn ManagedIdentities> {
        self.client.clone()
    }

    fn storage_accounts(&self) -> Arc<dyn StorageAccounts> {
        self.client.clone()
    }

    fn blob_containers(&self) -> Arc<dyn BlobContainers> {
        self.client.clone()
    }
}

/// Builds [`ArmFactory`] instances for the controllers
#[derive(Clone, Debug)]
pub struct ArmFactoryProvider {
    pub operation_timeout: Duration,
}

impl Default for ArmFactoryProvider {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl FactoryProvider for ArmFactoryProvider {
    fn factory(&self, auth: ClientAuth, cloud: CloudConfiguration) -> Result<Arc<dyn Factory>> {
        let client = ArmClient::new(auth, cloud)?.with_operation_timeout(self.operation_timeout);
        Ok(Arc::new(ArmFactory::new(client)))
    }
}
