//! Venue container resolution.
//!
//! Snaps are comments under a container post that the venue operator
//! publishes periodically. The resolver caches the newest container it has
//! seen per venue and rotates across venues after each successful post.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::VenueConfig;
use crate::error::PlatformError;
use crate::net::PlatformClient;

/// How many tagged posts to inspect per lookup.
const CONTAINER_QUERY_LIMIT: usize = 5;

/// The best-known container for one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueContainer {
    /// Venue name
    pub venue: String,
    /// Operator account (parent author for snaps)
    pub author: String,
    /// Container permlink (parent permlink for snaps)
    pub permlink: String,
    /// When the operator created it
    pub created_at: DateTime<Utc>,
}

/// Finds the current container for each venue.
pub struct ContainerResolver {
    platform: Arc<dyn PlatformClient>,
    venues: Vec<VenueConfig>,
    cache: HashMap<String, VenueContainer>,
    cursor: usize,
    call_timeout: Duration,
}

impl ContainerResolver {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        venues: Vec<VenueConfig>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            venues,
            cache: HashMap::new(),
            cursor: 0,
            call_timeout,
        }
    }

    /// The venue the next snap goes to.
    pub fn current_venue(&self) -> Option<&VenueConfig> {
        if self.venues.is_empty() {
            return None;
        }
        self.venues.get(self.cursor % self.venues.len())
    }

    /// Move the rotation to the next venue. Call only after a successful post.
    pub fn advance(&mut self) {
        if !self.venues.is_empty() {
            self.cursor = (self.cursor + 1) % self.venues.len();
        }
    }

    /// Cached container for `venue`, without querying.
    pub fn cached(&self, venue: &str) -> Option<&VenueContainer> {
        self.cache.get(venue)
    }

    /// Resolve the container for the current venue.
    pub async fn resolve_current(&mut self) -> Option<VenueContainer> {
        let venue = self.current_venue()?.clone();
        self.resolve(&venue).await
    }

    /// Newest container for `venue`, or `None` if none is known.
    ///
    /// A failed lookup falls back to the cached container.
    pub async fn resolve(&mut self, venue: &VenueConfig) -> Option<VenueContainer> {
        let query = self
            .platform
            .query_latest_by_tag(&venue.tag, CONTAINER_QUERY_LIMIT);
        let result = match tokio::time::timeout(self.call_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(self.call_timeout)),
        };

        match result {
            Ok(posts) => {
                let newest = posts
                    .into_iter()
                    .filter(|p| p.author == venue.operator && p.is_top_level())
                    .max_by_key(|p| p.created);
                match newest {
                    Some(post) => {
                        let candidate = VenueContainer {
                            venue: venue.name.clone(),
                            author: post.author,
                            permlink: post.permlink,
                            created_at: post.created,
                        };
                        self.offer(candidate);
                    }
                    None => {
                        debug!(venue = %venue.name, tag = %venue.tag, "No container found");
                    }
                }
            }
            Err(e) => {
                warn!(venue = %venue.name, error = %e, "Container lookup failed, using cache");
            }
        }

        self.cache.get(&venue.name).cloned()
    }

    /// Replace the cached container only with a strictly newer one.
    fn offer(&mut self, candidate: VenueContainer) {
        match self.cache.get(&candidate.venue) {
            Some(current) if candidate.created_at <= current.created_at => {}
            _ => {
                info!(
                    venue = %candidate.venue,
                    container = %candidate.permlink,
                    created = %candidate.created_at,
                    "Container updated"
                );
                self.cache.insert(candidate.venue.clone(), candidate);
            }
        }
    }
}

impl std::fmt::Debug for ContainerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerResolver")
            .field("venues", &self.venues)
            .field("cache", &self.cache)
            .field("cursor", &self.cursor)
            .finish()
    }
}
