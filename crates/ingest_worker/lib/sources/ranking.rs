use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{info, warn};

use super::{RankedEntity, RankingSource, SourceError};
use crate::http_client::SourceClient;

/// Upper bound of an owners range such as `"10,000,000 .. 20,000,000"`.
///
/// Anything unparsable yields 0 so malformed entries sink to the bottom of the ranking
/// instead of failing the fetch.
pub fn owners_upper(owners: &str) -> i64 {
    owners
        .rsplit("..")
        .next()
        .map(|upper| upper.trim().replace(',', ""))
        .and_then(|upper| upper.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Turns the aggregator's `{key: record}` map into the top `n` entities by popularity.
///
/// The sort is stable, so equal-popularity entities keep the aggregator's order. A payload
/// with no usable entry is an error, since the run would have nothing to iterate.
pub fn rank_entities(payload: Value, n: usize) -> Result<Vec<RankedEntity>, SourceError> {
    let Value::Object(records) = payload else {
        return Err(SourceError::Malformed(format!(
            "expected an object keyed by app id, got {}",
            json_type(&payload)
        )));
    };

    let mut entities: Vec<RankedEntity> = records
        .into_iter()
        .filter_map(|(key, record)| {
            let entity = parse_entity(&record);
            if entity.is_none() {
                warn!(
                    event = "ranking_entry_skipped",
                    key = %key,
                    "aggregator entry has no usable appid"
                );
            }
            entity
        })
        .collect();
    if entities.is_empty() {
        return Err(SourceError::NoEntities);
    }

    entities.sort_by(|a, b| b.popularity.cmp(&a.popularity));
    entities.truncate(n);
    Ok(entities)
}

fn parse_entity(record: &Value) -> Option<RankedEntity> {
    let id = match record.get("appid")? {
        Value::Number(number) => number.as_i64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    let name = record
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let popularity = record
        .get("owners")
        .and_then(Value::as_str)
        .map(owners_upper)
        .unwrap_or(0);

    Some(RankedEntity {
        id,
        name,
        popularity,
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// SteamSpy aggregator client (`request=top100forever`).
pub struct SteamSpyClient {
    http: SourceClient,
    api_url: String,
}

impl SteamSpyClient {
    pub fn new(http: SourceClient, api_url: String) -> Self {
        Self { http, api_url }
    }
}

impl RankingSource for SteamSpyClient {
    fn fetch_top_n<'a>(
        &'a self,
        n: usize,
    ) -> BoxFuture<'a, Result<Vec<RankedEntity>, SourceError>> {
        Box::pin(async move {
            let payload: Value = self
                .http
                .get_json("top games", &self.api_url, &[("request", "top100forever")])
                .await?;
            let ranked = rank_entities(payload, n)?;

            for entity in &ranked {
                info!(
                    event = "entity_ranked",
                    app_id = entity.id,
                    name = %entity.name,
                    owners_upper = entity.popularity,
                    "ranked entity"
                );
            }
            Ok(ranked)
        })
    }
}
