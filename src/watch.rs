//! Long-poll loop over the instance's services subtree.

use std::time::Duration;

use log::{error, info, warn};
use tokio::time::sleep;

use crate::agent::Agent;
use crate::error::Result;
use crate::store::services_prefix;

/// Exponential retry delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Watches the subtree forever, running a pass whenever its index moves.
///
/// Store errors and non-fatal pass errors are retried after a backoff; a
/// failed pass keeps the previous index so the next read returns at once.
/// Only fatal pass errors end the loop.
pub async fn watch_config_tree(agent: &Agent, mut backoff: Backoff) -> Result<()> {
    let prefix = services_prefix(agent.instance_id());
    let mut index = 0u64;
    info!("Watching {}", prefix);

    loop {
        let listing = match agent.store().list_since(&prefix, index).await {
            Ok(listing) => listing,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!("Watch on {} failed: {}. Retrying in {:?}", prefix, e, delay);
                sleep(delay).await;
                continue;
            }
        };

        if listing.index != index {
            match agent.handle_config(&listing.pairs).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!("Config tree for {} is unusable: {}", prefix, e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Pass at index {} failed: {}. Retrying in {:?}", listing.index, e, delay);
                    sleep(delay).await;
                    continue;
                }
            }
        }
        backoff.reset();

        index = if listing.index < index {
            warn!("Index went backwards ({} -> {}), resetting", index, listing.index);
            0
        } else {
            listing.index
        };
        agent.set_watch_index(index);
    }
}
