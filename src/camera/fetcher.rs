use std::time::Duration;

use log::{info, warn};
use reqwest::{Client, StatusCode};

use crate::error::{CameraError, Result};
use crate::models::{Region, RegionIndex, RegionTable};

use super::kv::{parse_kv_body, region_from_kv, region_to_params};

const ROI_CGI_PATH: &str = "/cgi-bin/control/camthermalroi.cgi";
const UNAUTHORIZED_MARKER: &str = "Unauthorized";
const WRITE_ERROR_MARKER: &str = "Error";
const STORE_MAX_ATTEMPTS: u32 = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

/// Reads and writes the ten region slots over the camera's CGI control endpoint.
///
/// Requests are issued one at a time, each with its own timeout, so a slow camera
/// stretches the whole fetch rather than failing it outright.
#[derive(Clone)]
pub struct ConfigFetcher {
    client: Client,
    address: String,
    endpoint: String,
    credentials: Credentials,
}

impl ConfigFetcher {
    /// `address` is the camera host, optionally with `:port`.
    pub fn new(address: &str, credentials: Credentials, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            address: address.to_string(),
            endpoint: format!("http://{address}{ROI_CGI_PATH}"),
            credentials,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fetches all ten regions. Any failure aborts the whole fetch; a partial
    /// table is never returned.
    pub async fn fetch_regions(&self) -> Result<RegionTable> {
        let mut regions = Vec::with_capacity(crate::models::REGION_COUNT);
        for index in RegionIndex::all() {
            regions.push(self.fetch_region(index).await?);
        }

        let table = RegionTable::from_regions(regions);
        info!(
            "Fetched region configuration from {} ({} in use)",
            self.address,
            table.used_count()
        );
        Ok(table)
    }

    pub async fn fetch_region(&self, index: RegionIndex) -> Result<Region> {
        let action = format!("getthermalroi{index}");
        let (status, body) = self.send(&action, &[]).await?;
        // Reads only fail this way when the camera refuses the credentials.
        if !status.is_success() {
            return Err(self.credentials_rejected(&action, status));
        }
        Ok(region_from_kv(index, &parse_kv_body(&body)))
    }

    /// Writes one region back to the camera, retrying transient failures.
    pub async fn store_region(&self, region: &Region) -> Result<()> {
        let action = format!("setthermalroi{}", region.index);
        let params = region_to_params(region);
        let mut last_failure = String::new();

        for attempt in 1..=STORE_MAX_ATTEMPTS {
            match self.send(&action, &params).await {
                Ok((status, body)) if status.is_success() && !body.contains(WRITE_ERROR_MARKER) => {
                    return Ok(())
                }
                Ok((status, body)) => last_failure = format!("status {status}: {}", body.trim()),
                Err(err) if err.is_authentication() => return Err(err),
                Err(err) => last_failure = err.to_string(),
            }

            warn!(
                "region {} store attempt {attempt}/{STORE_MAX_ATTEMPTS} failed: {last_failure}",
                region.index
            );
            if attempt < STORE_MAX_ATTEMPTS {
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
        }

        Err(CameraError::Rejected(format!(
            "region {}: {last_failure}",
            region.index
        )))
    }

    /// Writes every region, stopping at the first failure.
    pub async fn store_regions(&self, table: &RegionTable) -> Result<()> {
        for region in table.iter() {
            self.store_region(region).await?;
        }
        info!("Stored region configuration to {}", self.address);
        Ok(())
    }

    async fn send(
        &self,
        action: &str,
        extra: &[(&'static str, String)],
    ) -> Result<(StatusCode, String)> {
        let mut query: Vec<(&str, &str)> = vec![
            ("id", self.credentials.user_id.as_str()),
            ("passwd", self.credentials.password.as_str()),
            ("action", action),
        ];
        query.extend(extra.iter().map(|(key, value)| (*key, value.as_str())));

        let response = self.client.get(&self.endpoint).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // The camera reports bad credentials inside an otherwise successful response.
        if body.contains(UNAUTHORIZED_MARKER) {
            return Err(self.credentials_rejected(action, status));
        }

        Ok((status, body))
    }

    fn credentials_rejected(&self, action: &str, status: StatusCode) -> CameraError {
        CameraError::Authentication(format!(
            "{} (action {action}, status {status})",
            self.address
        ))
    }
}
