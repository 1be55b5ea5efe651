use std::{collections::BTreeMap, fmt};

use smind_sensor::{Capacity, DataBatch};
use thiserror::Error;

use crate::{PeerDirectory, PeerId, RequestManager};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Unknown source peer {0}")]
    UnknownSourcePeer(PeerId),
}

/// Identifies the aggregated data of one sensor on one peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardKey {
    pub peer_id: PeerId,
    pub source: String,
}

impl CardKey {
    pub fn new(peer_id: impl Into<PeerId>, source: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for CardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.peer_id, self.source)
    }
}

/// Aggregated visualization state for one [`CardKey`]
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub key: CardKey,
    /// Sensor name
    pub heading: String,
    /// Display name of the peer the data comes from
    pub sub_heading: String,
    batch: Option<DataBatch>,
}

impl Card {
    fn new(key: CardKey, sub_heading: String) -> Self {
        Self {
            heading: key.source.clone(),
            key,
            sub_heading,
            batch: None,
        }
    }

    pub fn batch(&self) -> Option<&DataBatch> {
        self.batch.as_ref()
    }

    pub fn len(&self) -> usize {
        self.batch.as_ref().map_or(0, DataBatch::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn absorb(&mut self, mut incoming: DataBatch) {
        match self.batch.as_mut() {
            Some(batch) => batch.merge(incoming),
            None => {
                incoming.set_capacity(Capacity::Unlimited);
                self.batch = Some(incoming);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Nobody wants this data any more, the batch was dropped
    Discarded,
    Created,
    Merged,
}

/// Per (peer, sensor) aggregation of incoming data batches.
///
/// A card only exists while its sensor is wanted: batches for unwanted
/// sensors are dropped on arrival, and [`AggregationStore::evict_unwanted`]
/// removes cards whose request has since been stopped or replaced.
#[derive(Debug, Default)]
pub struct AggregationStore {
    cards: BTreeMap<CardKey, Card>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `batch` from `source_peer` into its card, creating the card on
    /// first use. Stale data (no active request covers the sensor) is
    /// discarded without touching any card.
    pub fn ingest(
        &mut self,
        batch: DataBatch,
        source_peer: &str,
        requests: &RequestManager,
        directory: &PeerDirectory,
    ) -> Result<(CardKey, IngestOutcome), IngestError> {
        let key = CardKey::new(source_peer, batch.source());

        if !requests.is_sensor_wanted(source_peer, batch.source()) {
            log::debug!("Discarding {} readings for unwanted {key:}", batch.len());
            return Ok((key, IngestOutcome::Discarded));
        }

        let outcome = match self.cards.get_mut(&key) {
            Some(card) => {
                card.absorb(batch);
                IngestOutcome::Merged
            }
            None => {
                let sub_heading = directory
                    .display_name(source_peer)
                    .ok_or_else(|| IngestError::UnknownSourcePeer(source_peer.to_string()))?
                    .to_string();
                log::debug!("Creating card {key:} for {sub_heading:}");
                let mut card = Card::new(key.clone(), sub_heading);
                card.absorb(batch);
                self.cards.insert(key.clone(), card);
                IngestOutcome::Created
            }
        };

        Ok((key, outcome))
    }

    /// Remove every card whose sensor is no longer wanted, returning the
    /// removed keys
    pub fn evict_unwanted(&mut self, requests: &RequestManager) -> Vec<CardKey> {
        let removable = self
            .cards
            .keys()
            .filter(|k| !requests.is_sensor_wanted(&k.peer_id, &k.source))
            .cloned()
            .collect::<Vec<_>>();

        for key in &removable {
            if let Some(card) = self.cards.remove(key) {
                log::debug!("Removing unneeded card {} ({key:})", card.heading);
            }
        }
        removable
    }

    pub fn card(&self, key: &CardKey) -> Option<&Card> {
        self.cards.get(key)
    }

    pub fn keys(&self) -> Vec<CardKey> {
        self.cards.keys().cloned().collect()
    }

    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.values()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smind_sensor::{DeviceSensor, SensorReading};

    fn batch(source: &str, range: std::ops::Range<i64>) -> DataBatch {
        let mut batch = DataBatch::new(source);
        batch.add_readings(range.map(|ts| SensorReading::new(ts, vec![ts as f64])));
        batch
    }

    fn setup() -> (AggregationStore, RequestManager, PeerDirectory) {
        let mut requests = RequestManager::new();
        requests.set_request(
            "watch1",
            vec![DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE")],
            "phone",
        );
        let mut directory = PeerDirectory::new();
        directory.upsert("watch1", "Pixel Watch");
        (AggregationStore::new(), requests, directory)
    }

    #[test]
    fn unwanted_batch_never_creates_a_card() {
        let (mut store, requests, directory) = setup();
        let (_key, outcome) = store
            .ingest(batch("LIGHT", 0..3), "watch1", &requests, &directory)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded);
        assert!(store.is_empty());
    }

    #[test]
    fn batches_merge_in_arrival_order() {
        let (mut store, requests, directory) = setup();
        let (key, first) = store
            .ingest(batch("HEART_RATE", 0..3), "watch1", &requests, &directory)
            .unwrap();
        let (_, second) = store
            .ingest(batch("HEART_RATE", 3..8), "watch1", &requests, &directory)
            .unwrap();

        assert_eq!(first, IngestOutcome::Created);
        assert_eq!(second, IngestOutcome::Merged);

        let card = store.card(&key).unwrap();
        assert_eq!(card.heading, "HEART_RATE");
        assert_eq!(card.sub_heading, "Pixel Watch");
        let ts = card
            .batch()
            .unwrap()
            .readings()
            .map(|r| r.timestamp)
            .collect::<Vec<_>>();
        assert_eq!(ts, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn adopted_batch_becomes_unlimited() {
        let (mut store, requests, directory) = setup();
        let (key, _) = store
            .ingest(batch("HEART_RATE", 0..50), "watch1", &requests, &directory)
            .unwrap();
        for i in 1..5 {
            store
                .ingest(
                    batch("HEART_RATE", i * 50..(i + 1) * 50),
                    "watch1",
                    &requests,
                    &directory,
                )
                .unwrap();
        }
        let card = store.card(&key).unwrap();
        assert_eq!(card.batch().map(DataBatch::capacity), Some(Capacity::Unlimited));
        assert_eq!(card.len(), 250);
    }

    #[test]
    fn unresolvable_peer_is_rejected() {
        let (mut store, mut requests, directory) = setup();
        requests.set_request(
            "stranger",
            vec![DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE")],
            "phone",
        );
        assert_eq!(
            store.ingest(batch("HEART_RATE", 0..2), "stranger", &requests, &directory),
            Err(IngestError::UnknownSourcePeer("stranger".to_string()))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn replaced_selection_evicts_and_blocks_resurrection() {
        let (mut store, mut requests, directory) = setup();
        let (key, _) = store
            .ingest(batch("HEART_RATE", 0..2), "watch1", &requests, &directory)
            .unwrap();
        assert_eq!(store.card(&key).map(Card::len), Some(2));

        requests.set_request(
            "watch1",
            vec![DeviceSensor::new(DeviceSensor::ACCELEROMETER, "ACCELEROMETER")],
            "phone",
        );
        // stale until evicted
        assert!(store.card(&key).is_some());

        assert_eq!(store.evict_unwanted(&requests), vec![key.clone()]);
        assert!(store.card(&key).is_none());

        let (_, outcome) = store
            .ingest(batch("HEART_RATE", 2..4), "watch1", &requests, &directory)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded);
        assert!(store.is_empty());
    }

    #[test]
    fn stale_card_is_left_untouched_until_evicted() {
        let (mut store, mut requests, directory) = setup();
        let (key, _) = store
            .ingest(batch("HEART_RATE", 0..3), "watch1", &requests, &directory)
            .unwrap();
        let before = store.card(&key).cloned();

        requests.set_request(
            "watch1",
            vec![DeviceSensor::new(DeviceSensor::ACCELEROMETER, "ACCELEROMETER")],
            "phone",
        );
        let (_, outcome) = store
            .ingest(batch("HEART_RATE", 3..6), "watch1", &requests, &directory)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded);
        assert_eq!(store.card(&key).cloned(), before);
        assert_eq!(store.card(&key).map(Card::len), Some(3));

        requests.stop_all();
        let (_, outcome) = store
            .ingest(batch("HEART_RATE", 6..9), "watch1", &requests, &directory)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Discarded);
        assert_eq!(store.card(&key).cloned(), before);
    }

    #[test]
    fn stop_then_evict_clears_everything() {
        let (mut store, mut requests, directory) = setup();
        store
            .ingest(batch("HEART_RATE", 0..2), "watch1", &requests, &directory)
            .unwrap();
        requests.stop_all();
        assert_eq!(store.evict_unwanted(&requests).len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn keys_do_not_collide_on_separator() {
        assert_ne!(CardKey::new("a-b", "c"), CardKey::new("a", "b-c"));
    }
}
