//! Third-party sources: the aggregator that ranks entities and the paginated reviews API.
//!
//! HTTP access sits behind the `RankingSource` and `ReviewPageSource` traits so the ranking
//! and pagination control flow can be exercised against scripted doubles.

mod ranking;
mod reviews;

pub use ranking::{owners_upper, rank_entities, SteamSpyClient};
pub use reviews::{
    EntityFetchReport, EntityReviews, PaginatedReviewFetcher, PaginationSettings,
    SteamReviewsClient, StopReason,
};

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http_client::HttpError;

/// Column names the entity identifiers are written under on every review record.
pub const ENTITY_ID_FIELD: &str = "app_id";
pub const ENTITY_NAME_FIELD: &str = "game_name";

/// One ranked entity. Derived once per run from the aggregator snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntity {
    pub id: i64,
    pub name: String,
    pub popularity: i64,
}

/// A review exactly as the source sent it, plus the owning entity's id and name. Unknown
/// fields are carried through untouched.
pub type RawReviewRecord = Map<String, Value>;

/// One page of the reviews API.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ReviewPage {
    #[serde(default)]
    pub reviews: Vec<Value>,
    #[serde(default, deserialize_with = "string_cursor")]
    pub cursor: Option<String>,
}

/// A cursor that is not a string can't be sent back, so it reads as absent and the page's
/// reviews are still kept.
fn string_cursor<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(cursor) => Some(cursor),
        _ => None,
    })
}

/// Parameters of a single page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub entity_id: i64,
    pub cursor: Option<&'a str>,
    pub page_size: u32,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("ranking source unavailable: {0}")]
    Unavailable(#[from] HttpError),

    #[error("ranking source returned malformed content: {0}")]
    Malformed(String),

    #[error("ranking source returned no rankable entities")]
    NoEntities,
}

/// Fetches the ranked entity list for a run.
pub trait RankingSource: Send + Sync {
    fn fetch_top_n<'a>(&'a self, n: usize)
        -> BoxFuture<'a, Result<Vec<RankedEntity>, SourceError>>;
}

impl<T> RankingSource for Arc<T>
where
    T: RankingSource + ?Sized,
{
    fn fetch_top_n<'a>(
        &'a self,
        n: usize,
    ) -> BoxFuture<'a, Result<Vec<RankedEntity>, SourceError>> {
        (**self).fetch_top_n(n)
    }
}

/// Fetches one page of reviews for one entity.
pub trait ReviewPageSource: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        request: PageRequest<'a>,
    ) -> BoxFuture<'a, Result<ReviewPage, HttpError>>;
}

impl<T> ReviewPageSource for Arc<T>
where
    T: ReviewPageSource + ?Sized,
{
    fn fetch_page<'a>(
        &'a self,
        request: PageRequest<'a>,
    ) -> BoxFuture<'a, Result<ReviewPage, HttpError>> {
        (**self).fetch_page(request)
    }
}

#[cfg(test)]
mod tests {
    use super::ReviewPage;
    use serde_json::json;

    #[test]
    fn non_string_cursor_keeps_the_page() {
        let page: ReviewPage = serde_json::from_value(json!({
            "success": 1,
            "reviews": [{"recommendationid": "1"}, {"recommendationid": "2"}],
            "cursor": 42
        }))
        .expect("page decodes");

        assert_eq!(page.reviews.len(), 2);
        assert_eq!(page.cursor, None);
    }

    #[test]
    fn null_or_missing_cursor_is_absent() {
        let null: ReviewPage =
            serde_json::from_value(json!({"reviews": [], "cursor": null})).expect("decodes");
        let missing: ReviewPage = serde_json::from_value(json!({"reviews": []})).expect("decodes");

        assert_eq!(null.cursor, None);
        assert_eq!(missing.cursor, None);
        assert_eq!(
            serde_json::from_value::<ReviewPage>(json!({"cursor": "AoJw"}))
                .expect("decodes")
                .cursor
                .as_deref(),
            Some("AoJw")
        );
    }
}
