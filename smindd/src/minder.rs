use smind_broker::{CardKey, HubEvent, PeerId};
use smind_sensor::SensorReading;
use std::collections::{BTreeMap, HashMap};

use crate::SensorMinderError;

pub type SensorMinderResult<T> = std::result::Result<T, SensorMinderError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CardSummary {
    pub heading: String,
    pub sub_heading: String,
    pub readings: usize,
    pub latest: Option<SensorReading>,
}

/// Daemon side view of the hub, rebuilt from [`HubEvent`]s
#[derive(Debug)]
pub struct SensorMinder {
    pub running: bool,
    pub cards: BTreeMap<CardKey, CardSummary>,
    pub statuses: HashMap<PeerId, String>,
    pub unreachable: Vec<PeerId>,
    ticks: u64,
    status_every: u64,
}

impl SensorMinder {
    /// `status_every` is the number of ticks between status requests
    pub fn new(status_every: u64) -> Self {
        Self {
            running: true,
            cards: BTreeMap::new(),
            statuses: HashMap::new(),
            unreachable: vec![],
            ticks: 0,
            status_every: status_every.max(1),
        }
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Log a summary of every card. Returns true when it is time to ask
    /// the peers for their status.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        for (key, card) in &self.cards {
            match &card.latest {
                Some(latest) => log::info!(
                    "{} on {} ({key:}): {} readings, latest {:?} at {}",
                    card.heading,
                    card.sub_heading,
                    card.readings,
                    latest.values,
                    format_timestamp(latest.timestamp)
                ),
                None => log::info!("{} on {}: no readings", card.heading, card.sub_heading),
            }
        }
        self.ticks % self.status_every == 1 || self.status_every == 1
    }

    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::CardCreated {
                key,
                heading,
                sub_heading,
            } => {
                self.cards.insert(
                    key,
                    CardSummary {
                        heading,
                        sub_heading,
                        readings: 0,
                        latest: None,
                    },
                );
            }
            HubEvent::DataChanged { key, batch } => {
                if let Some(card) = self.cards.get_mut(&key) {
                    card.readings += batch.len();
                    if let Some(newest) = batch.newest() {
                        card.latest = Some(newest.clone());
                    }
                } else {
                    log::warn!("Data for untracked card {key:}");
                }
            }
            HubEvent::CardRemoved(key) => {
                if self.cards.remove(&key).is_some() {
                    log::info!("No longer showing {key:}");
                }
            }
            HubEvent::StatusReceived { peer, status } => {
                self.statuses.insert(peer, status);
            }
            HubEvent::PeerClosing { peer, label } => {
                log::info!("{label:} ({peer:}) went away");
                self.statuses.remove(&peer);
            }
            HubEvent::ReachabilityChanged { peer, reachable } => {
                self.unreachable.retain(|p| *p != peer);
                if !reachable {
                    self.unreachable.push(peer);
                }
            }
        }
    }
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smind_sensor::DataBatch;

    fn created(key: &CardKey) -> HubEvent {
        HubEvent::CardCreated {
            key: key.clone(),
            heading: key.source.clone(),
            sub_heading: "Pixel Watch".to_string(),
        }
    }

    #[test]
    fn tracks_card_lifecycle() {
        let mut minder = SensorMinder::new(5);
        let key = CardKey::new("watch1", "HEART_RATE");
        minder.apply(created(&key));

        let mut batch = DataBatch::new("HEART_RATE");
        batch.add_reading(SensorReading::new(1, vec![61.0]));
        batch.add_reading(SensorReading::new(2, vec![62.0]));
        minder.apply(HubEvent::DataChanged {
            key: key.clone(),
            batch,
        });

        let card = &minder.cards[&key];
        assert_eq!(card.readings, 2);
        assert_eq!(card.latest.as_ref().map(|r| r.timestamp), Some(2));

        assert_ne!(format_timestamp(2), "2");

        minder.apply(HubEvent::CardRemoved(key.clone()));
        assert!(minder.cards.is_empty());
    }

    #[test]
    fn status_requested_periodically() {
        let mut minder = SensorMinder::new(3);
        let due = (0..6).map(|_| minder.tick()).collect::<Vec<_>>();
        assert_eq!(due, vec![true, false, false, true, false, false]);
    }

    #[test]
    fn reachability_is_deduplicated() {
        let mut minder = SensorMinder::new(1);
        for reachable in [false, false, true, false] {
            minder.apply(HubEvent::ReachabilityChanged {
                peer: "watch1".to_string(),
                reachable,
            });
        }
        assert_eq!(minder.unreachable, vec!["watch1".to_string()]);
    }
}
