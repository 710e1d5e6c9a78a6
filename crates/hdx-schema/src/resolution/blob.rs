//! Cloud blob storage provider
//!
//! Documents live in a single container; a reference path is the blob name
//! inside it. Requests are HTTP GETs authorized by a SAS token when the
//! connection string carries one, otherwise signed with the account key
//! (Shared Key), otherwise sent anonymously for public containers.

use super::{Scheme, SchemaServiceProvider};
use crate::config::BlobStorageInfo;
use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const DEVELOPMENT_STORAGE_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";
const DEVELOPMENT_STORAGE_ACCOUNT: &str = "devstoreaccount1";
/// Published key of the local storage emulator
const DEVELOPMENT_STORAGE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const STORAGE_API_VERSION: &str = "2021-08-06";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

/// Decoded storage account key
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey(Vec<u8>);

impl AccountKey {
    /// Decode a base64 account key
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `encoded` is not valid base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        STANDARD
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| Error::Config(format!("AccountKey is not valid base64: {e}")))
    }

    fn sign(&self, string_to_sign: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.0)
            .map_err(|e| provider_error(format!("Unusable account key: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Where blobs are served from, parsed out of a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEndpoint {
    /// Account URL without a trailing slash
    pub base_url: String,
    /// Storage account, needed to sign requests
    pub account_name: Option<String>,
    /// SAS token without the leading `?`
    pub sas_token: Option<String>,
    pub account_key: Option<AccountKey>,
}

impl BlobEndpoint {
    /// Parse a `Key=Value;Key=Value` storage connection string
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no blob endpoint can be derived, the
    /// endpoint is not a URL, or the account key is not base64.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut dev_storage = false;
        let mut blob_endpoint = None;
        let mut account_name = None;
        let mut protocol = "https".to_string();
        let mut suffix = DEFAULT_ENDPOINT_SUFFIX.to_string();
        let mut sas_token = None;
        let mut account_key = None;

        for part in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // Base64 keys end in '=', so split on the first one only
            let Some((key, value)) = part.split_once('=') else {
                return Err(Error::Config(format!(
                    "Malformed connection string segment: {part}"
                )));
            };
            match key.trim() {
                "UseDevelopmentStorage" => dev_storage = value.trim().eq_ignore_ascii_case("true"),
                "BlobEndpoint" => blob_endpoint = Some(value.trim().to_string()),
                "AccountName" => account_name = Some(value.trim().to_string()),
                "DefaultEndpointsProtocol" => protocol = value.trim().to_string(),
                "EndpointSuffix" => suffix = value.trim().to_string(),
                "SharedAccessSignature" => {
                    sas_token = Some(value.trim().trim_start_matches('?').to_string());
                }
                "AccountKey" => account_key = Some(AccountKey::from_base64(value)?),
                _ => {}
            }
        }

        if dev_storage {
            account_name.get_or_insert_with(|| DEVELOPMENT_STORAGE_ACCOUNT.to_string());
            if account_key.is_none() {
                account_key = Some(AccountKey::from_base64(DEVELOPMENT_STORAGE_KEY)?);
            }
        }

        let base_url = if let Some(endpoint) = blob_endpoint {
            endpoint
        } else if dev_storage {
            DEVELOPMENT_STORAGE_ENDPOINT.to_string()
        } else if let Some(account) = &account_name {
            format!("{protocol}://{account}.blob.{suffix}")
        } else {
            return Err(Error::Config(
                "Connection string names no blob endpoint or account".to_string(),
            ));
        };
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid blob endpoint {base_url}: {e}")))?;

        if account_key.is_some() && account_name.is_none() && sas_token.is_none() {
            warn!(
                "Connection string has an AccountKey but no AccountName, blob requests are sent anonymously"
            );
        }

        Ok(Self {
            base_url,
            account_name,
            sas_token,
            account_key,
        })
    }

    /// Percent-encoded `/container/blob` path
    fn blob_path(container: &str, blob_name: &str) -> String {
        let encoded: Vec<String> = blob_name
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("/{}/{}", container, encoded.join("/"))
    }

    /// URL of `blob_name` inside `container`
    pub fn blob_url(&self, container: &str, blob_name: &str) -> String {
        let mut url = format!("{}{}", self.base_url, Self::blob_path(container, blob_name));
        if let Some(sas) = &self.sas_token {
            url.push('?');
            url.push_str(sas);
        }
        url
    }

    /// Shared Key string-to-sign for a GET of `blob_name` at `date`
    ///
    /// `None` when requests are not signed: a SAS token is present, or the
    /// account name or key is missing.
    pub fn string_to_sign(&self, container: &str, blob_name: &str, date: &str) -> Option<String> {
        if self.sas_token.is_some() || self.account_key.is_none() {
            return None;
        }
        let account = self.account_name.as_deref()?;
        // Path-style endpoints (the emulator) carry the account in the URL path too
        let prefix = Url::parse(&self.base_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();

        // Verb, eleven empty standard headers, x-ms-* headers, resource
        let mut text = String::from("GET\n");
        text.push_str(&"\n".repeat(11));
        text.push_str(&format!("x-ms-date:{date}\nx-ms-version:{STORAGE_API_VERSION}\n"));
        text.push_str(&format!(
            "/{account}{prefix}{}",
            Self::blob_path(container, blob_name)
        ));
        Some(text)
    }

    /// `Authorization` header value for a GET of `blob_name` at `date`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the account key cannot key the HMAC.
    pub fn shared_key_authorization(
        &self,
        container: &str,
        blob_name: &str,
        date: &str,
    ) -> Result<Option<String>> {
        let (Some(text), Some(key), Some(account)) = (
            self.string_to_sign(container, blob_name, date),
            self.account_key.as_ref(),
            self.account_name.as_deref(),
        ) else {
            return Ok(None);
        };
        let signature = key.sign(&text)?;
        Ok(Some(format!("SharedKey {account}:{signature}")))
    }
}

/// Serves `azure:` references from one blob container
#[derive(Debug)]
pub struct BlobProvider {
    storage: Option<BlobStorageInfo>,
    endpoint: OnceCell<BlobEndpoint>,
    client: OnceCell<Client>,
}

impl BlobProvider {
    pub fn new(storage: Option<BlobStorageInfo>) -> Self {
        Self {
            storage,
            endpoint: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    pub fn storage(&self) -> Option<&BlobStorageInfo> {
        self.storage.as_ref()
    }

    fn storage_or_err(&self) -> Result<&BlobStorageInfo> {
        self.storage.as_ref().ok_or_else(|| {
            provider_error("No blob storage connection string is configured".to_string())
        })
    }

    /// Parsed on first use and kept for the provider's lifetime
    fn endpoint(&self) -> Result<&BlobEndpoint> {
        let storage = self.storage_or_err()?;
        self.endpoint
            .get_or_try_init(|| BlobEndpoint::from_connection_string(&storage.connection_string))
    }

    fn client(&self) -> Result<&Client> {
        self.client.get_or_try_init(|| {
            Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| provider_error(format!("Failed to build HTTP client: {e}")))
        })
    }
}

fn provider_error(message: String) -> Error {
    Error::Provider {
        scheme: Scheme::Azure.to_string(),
        message,
    }
}

/// RFC 1123 timestamp for the `x-ms-date` header
fn request_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl SchemaServiceProvider for BlobProvider {
    fn scheme(&self) -> Scheme {
        Scheme::Azure
    }

    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let storage = self.storage_or_err()?;
        let endpoint = self.endpoint()?;
        let url = endpoint.blob_url(&storage.container, path);
        debug!("Downloading blob {} from container {}", path, storage.container);

        let date = request_date();
        let mut request = self
            .client()?
            .get(&url)
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION);
        if let Some(authorization) =
            endpoint.shared_key_authorization(&storage.container, path, &date)?
        {
            request = request.header("Authorization", authorization);
        }

        let response = request
            .send()
            .map_err(|e| provider_error(format!("Request for {path} failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::UnresolvedReference {
                reference: format!("azure:{path}"),
                message: format!("Blob does not exist in container {}", storage.container),
            }),
            status if status.is_success() => response
                .bytes()
                .map(|bytes| bytes.to_vec())
                .map_err(|e| provider_error(format!("Failed to read blob {path}: {e}"))),
            StatusCode::FORBIDDEN => Err(provider_error(format!(
                "Access to {path} was denied, check the storage credentials"
            ))),
            status => Err(provider_error(format!(
                "Download of {path} failed with status {status}"
            ))),
        }
    }
}
