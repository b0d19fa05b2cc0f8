//! Per-patient live feed.
//!
//! Every persisted reading produced by a tick, a backfill or an external
//! ingest is published as a [`GlucoseUpdate`]. Delivery to subscribers is the
//! transport's business; `FeedHub` fans events out over tokio broadcast
//! channels keyed by patient.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::models::Reading;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseUpdate {
    pub patient_id: String,
    pub data: Vec<Reading>,
}

impl GlucoseUpdate {
    pub fn single(reading: Reading) -> Self {
        Self {
            patient_id: reading.patient_id.clone(),
            data: vec![reading],
        }
    }
}

pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to current subscribers; returns how many received it.
    fn publish(&self, event: GlucoseUpdate) -> Result<usize>;
}

pub struct FeedHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<GlucoseUpdate>>>,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<GlucoseUpdate>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self, patient_id: &str) -> broadcast::Receiver<GlucoseUpdate> {
        self.channels()
            .entry(patient_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for FeedHub {
    fn publish(&self, event: GlucoseUpdate) -> Result<usize> {
        let mut channels = self.channels();
        let Some(sender) = channels.get(&event.patient_id) else {
            return Ok(0);
        };

        let patient_id = event.patient_id.clone();
        match sender.send(event) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // every receiver is gone; forget the channel
                channels.remove(&patient_id);
                debug!("Dropped feed channel for {patient_id}: no subscribers");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn delivers_only_to_matching_patient() {
        let hub = FeedHub::new(8);
        let mut p1 = hub.subscribe("P1");
        let mut p2 = hub.subscribe("P2");

        let delivered = hub
            .publish(GlucoseUpdate::single(Reading::new("P1", 110.0, Utc::now())))
            .unwrap();
        assert_eq!(delivered, 1);

        let event = p1.recv().await.unwrap();
        assert_eq!(event.patient_id, "P1");
        assert_eq!(event.data.len(), 1);
        assert!(p2.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let hub = FeedHub::default();
        let event = GlucoseUpdate::single(Reading::new("P9", 90.0, Utc::now()));
        assert_eq!(hub.publish(event.clone()).unwrap(), 0);

        let receiver = hub.subscribe("P9");
        drop(receiver);
        assert_eq!(hub.publish(event).unwrap(), 0);
        assert!(!hub.channels().contains_key("P9"));
    }
}
