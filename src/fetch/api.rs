//! Fetcher backed by the external maintenance API.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, info};

use super::http_client::HttpClient;
use super::{FetchError, Fetcher, RawRecord};
use crate::models::DomainType;
use crate::sync::context::RunContext;

/// Key under which the fetcher records which plant a request was scoped to.
///
/// Processors consult it only after every plant field the payload itself may
/// carry, so it never masks a plant code the API returned.
pub const REQUEST_PLANT_KEY: &str = "_request_plant";

/// Endpoint paths per domain type.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    paths: HashMap<DomainType, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        let paths = DomainType::ALL
            .into_iter()
            .map(|domain| (domain, default_path(domain).to_string()))
            .collect();
        Self { paths }
    }
}

fn default_path(domain: DomainType) -> &'static str {
    match domain {
        DomainType::Equipment => "equipment",
        DomainType::WorkOrders => "work-orders",
        DomainType::RunningTime => "running-times",
        DomainType::EquipmentWorkOrders => "equipment-work-orders",
        DomainType::EquipmentMaterials => "equipment-materials",
        DomainType::DailyPlantData => "daily-plant-data",
    }
}

impl EndpointConfig {
    /// Apply per-type overrides keyed by domain type name; unknown names are ignored.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (name, path) in overrides {
            match DomainType::from_str(name) {
                Some(domain) => {
                    self.paths.insert(domain, path.clone());
                }
                None => debug!(name = %name, "Ignoring endpoint override for unknown domain type"),
            }
        }
        self
    }

    pub fn path(&self, domain: DomainType) -> &str {
        self.paths
            .get(&domain)
            .map(String::as_str)
            .unwrap_or_else(|| default_path(domain))
    }
}

/// Fetches each domain type from its API endpoint, one request per plant.
#[derive(Clone)]
pub struct ApiFetcher {
    client: HttpClient,
    endpoints: EndpointConfig,
    concurrency: usize,
}

impl ApiFetcher {
    pub fn new(client: HttpClient, endpoints: EndpointConfig, concurrency: usize) -> Self {
        Self {
            client,
            endpoints,
            concurrency: concurrency.max(1),
        }
    }

    fn query(ctx: &RunContext, plant: Option<&str>) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(3);
        if let Some(plant) = plant {
            query.push(("plant", plant.to_string()));
        }
        if let Some(range) = ctx.date_range {
            query.push(("from", range.start.format("%Y-%m-%d").to_string()));
            query.push(("to", range.end.format("%Y-%m-%d").to_string()));
        }
        query
    }

    async fn fetch_plant(
        &self,
        path: &str,
        ctx: &RunContext,
        plant: Option<&str>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let query = Self::query(ctx, plant);
        let mut records = self.client.get_records(path, &query).await?;
        if let Some(plant) = plant {
            for record in &mut records {
                record.insert(REQUEST_PLANT_KEY.to_string(), Value::String(plant.to_string()));
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Fetcher for ApiFetcher {
    async fn fetch(&self, domain: DomainType, ctx: &RunContext) -> Result<Vec<RawRecord>, FetchError> {
        let path = self.endpoints.path(domain).to_string();

        let batches: Vec<Vec<RawRecord>> = match ctx.plants.codes() {
            None => vec![self.fetch_plant(&path, ctx, None).await?],
            Some(codes) => {
                let requests: Vec<_> = codes
                    .iter()
                    .map(|code| self.fetch_plant(&path, ctx, Some(code.as_str())))
                    .collect();
                stream::iter(requests)
                    .buffered(self.concurrency)
                    .try_collect()
                    .await?
            }
        };

        let records: Vec<RawRecord> = batches.into_iter().flatten().collect();
        info!(
            domain = %domain,
            run_id = %ctx.run_id,
            records = records.len(),
            "Fetched records"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DateRange;
    use crate::sync::context::PlantScope;
    use chrono::NaiveDate;

    #[test]
    fn test_endpoint_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("work_orders".to_string(), "v3/orders".to_string());
        overrides.insert("nonsense".to_string(), "ignored".to_string());

        let endpoints = EndpointConfig::default().with_overrides(&overrides);
        assert_eq!(endpoints.path(DomainType::WorkOrders), "v3/orders");
        assert_eq!(endpoints.path(DomainType::Equipment), "equipment");
    }

    #[test]
    fn test_query_includes_plant_and_dates() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        let ctx = RunContext::new("run", PlantScope::only(["A01"]), Some(range));
        let query = ApiFetcher::query(&ctx, Some("A01"));
        assert_eq!(
            query,
            vec![
                ("plant", "A01".to_string()),
                ("from", "2024-01-01".to_string()),
                ("to", "2024-01-31".to_string()),
            ]
        );

        let ctx = RunContext::new("run", PlantScope::All, None);
        assert!(ApiFetcher::query(&ctx, None).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_fails_whole_fetch() {
        // Port 9 (discard) on localhost is not serving HTTP.
        let client = HttpClient::new("http://127.0.0.1:9/api", std::time::Duration::from_millis(500)).unwrap();
        let fetcher = ApiFetcher::new(client, EndpointConfig::default(), 2);
        let ctx = RunContext::new("run", PlantScope::only(["A01", "B02"]), None);

        let result = fetcher.fetch(DomainType::Equipment, &ctx).await;
        assert!(matches!(result, Err(FetchError::Http { .. })));
    }
}
