use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::atlas::{filter_id_in, AtlasClient};
use crate::error::{Error, ErrorDetails};

/// Team and player IDs participating in any currently live series.
/// Both sequences are deduplicated and come from the same rosters snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveContext {
    pub team_ids: Vec<u64>,
    pub player_ids: Vec<u64>,
}

struct CacheEntry {
    context: LiveContext,
    expires_at: Instant,
}

/// Single-slot TTL cache for [`LiveContext`].
///
/// The read path only takes the shared lock. On a miss the writer re-checks
/// under the exclusive lock before loading, so concurrent callers behind an
/// expired slot trigger at most one load; the rest observe its result.
pub struct LiveCache {
    ttl: Duration,
    slot: RwLock<Option<CacheEntry>>,
}

impl LiveCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<LiveContext, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LiveContext, Error>>,
    {
        {
            let slot = self.slot.read().await;
            if let Some(entry) = slot.as_ref() {
                if Instant::now() < entry.expires_at {
                    return Ok(entry.context.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another load may have completed while we waited for the lock.
        if let Some(entry) = slot.as_ref() {
            if Instant::now() < entry.expires_at {
                return Ok(entry.context.clone());
            }
        }
        // A failed load leaves the slot untouched; the next caller re-attempts.
        let context = load().await?;
        *slot = Some(CacheEntry {
            context: context.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(context)
    }
}

/// Derives live teams and players from live series:
/// series -> roster IDs -> rosters -> {team, player} IDs.
pub struct LiveService {
    atlas: Arc<AtlasClient>,
    cache: LiveCache,
}

impl LiveService {
    pub fn new(atlas: Arc<AtlasClient>, cache_ttl: Duration) -> Self {
        Self {
            atlas,
            cache: LiveCache::new(cache_ttl),
        }
    }

    /// The cached live context, or a freshly derived one.
    pub async fn get_live_context(&self) -> Result<LiveContext, Error> {
        self.cache.get_or_load(|| self.load_live_context()).await
    }

    async fn load_live_context(&self) -> Result<LiveContext, Error> {
        let params = BTreeMap::from([("filter".to_string(), "lifecycle=live".to_string())]);
        let (series_body, _) = self.atlas.get_series_all(&params).await?;
        let series = decode_array(&series_body, "series")?;

        let roster_ids = extract_roster_ids(&series);
        if roster_ids.is_empty() {
            return Ok(LiveContext::default());
        }

        // Server-side filter: Atlas returns only the rosters we ask for.
        let roster_ids: Vec<u64> = roster_ids.into_iter().collect();
        let params = BTreeMap::from([("filter".to_string(), filter_id_in(&roster_ids))]);
        let (rosters_body, _) = self.atlas.get_rosters_all(&params).await?;
        let rosters = decode_array(&rosters_body, "rosters")?;

        let (team_ids, player_ids) = extract_team_and_player_ids(&rosters);
        Ok(LiveContext {
            team_ids: team_ids.into_iter().collect(),
            player_ids: player_ids.into_iter().collect(),
        })
    }
}

fn decode_array(body: &[u8], what: &str) -> Result<Vec<Value>, Error> {
    serde_json::from_slice(body).map_err(|e| {
        Error::new(ErrorDetails::AtlasDecode {
            message: format!("invalid {what} payload: {e}"),
        })
    })
}

/// Collect unique `participants[*].roster.id` values. The Atlas schema is
/// nominally typed but omissions happen; missing or mistyped fields are
/// skipped rather than failing the derivation.
fn extract_roster_ids(series: &[Value]) -> BTreeSet<u64> {
    let mut ids = BTreeSet::new();
    for entry in series {
        let Some(participants) = entry.get("participants").and_then(Value::as_array) else {
            continue;
        };
        for participant in participants {
            if let Some(id) = participant
                .get("roster")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_u64)
            {
                ids.insert(id);
            }
        }
    }
    ids
}

/// Collect unique `team.id` and `line_up.players[*].id` values per roster.
fn extract_team_and_player_ids(rosters: &[Value]) -> (BTreeSet<u64>, BTreeSet<u64>) {
    let mut team_ids = BTreeSet::new();
    let mut player_ids = BTreeSet::new();
    for roster in rosters {
        if let Some(id) = roster
            .get("team")
            .and_then(|t| t.get("id"))
            .and_then(Value::as_u64)
        {
            team_ids.insert(id);
        }
        if let Some(players) = roster
            .get("line_up")
            .and_then(|l| l.get("players"))
            .and_then(Value::as_array)
        {
            for player in players {
                if let Some(id) = player.get("id").and_then(Value::as_u64) {
                    player_ids.insert(id);
                }
            }
        }
    }
    (team_ids, player_ids)
}
