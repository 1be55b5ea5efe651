use std::collections::{hash_map::Entry, HashMap};

use smind_sensor::{now_millis, DeviceSensor, SensorDataRequest};

use crate::{PeerId, TransportError};

/// A request plus the sensors it was built from. The wire only carries
/// sensor type ids but incoming batches are labelled by sensor name, so
/// the selection is kept next to the request for the wanted check.
#[derive(Debug)]
struct TrackedRequest {
    request: SensorDataRequest,
    sensors: Vec<DeviceSensor>,
}

/// Tracks the single current [`SensorDataRequest`] per peer.
///
/// Requests are never removed: a stopped request stays as a tombstone so
/// that its terminal timestamp can be sent to the peer, and is replaced
/// the next time sensors are selected for that peer.
#[derive(Debug, Default)]
pub struct RequestManager {
    requests: HashMap<PeerId, TrackedRequest>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was requested from `peer` with a new active request
    /// for `sensors`, streamed to `source_node_id`. Sensor sets are not
    /// merged: a re-selection is a new streaming session.
    pub fn set_request(
        &mut self,
        peer: impl Into<PeerId>,
        sensors: Vec<DeviceSensor>,
        source_node_id: impl Into<String>,
    ) -> &SensorDataRequest {
        let peer = peer.into();
        if sensors.is_empty() {
            log::warn!("Empty sensor selection for {peer:}, nothing will be streamed");
        } else {
            log::debug!(
                "Selected sensors for {peer:}: {}",
                sensors
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let request = SensorDataRequest::new(
            source_node_id,
            sensors.iter().map(|s| s.sensor_type).collect(),
        );
        let tracked = TrackedRequest { request, sensors };
        let slot = match self.requests.entry(peer) {
            Entry::Occupied(mut entry) => {
                entry.insert(tracked);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(tracked),
        };
        &slot.request
    }

    pub fn request(&self, peer: &str) -> Option<&SensorDataRequest> {
        self.requests.get(peer).map(|t| &t.request)
    }

    pub fn selected_sensors(&self, peer: &str) -> &[DeviceSensor] {
        self.requests
            .get(peer)
            .map(|t| t.sensors.as_slice())
            .unwrap_or_default()
    }

    /// Peers with a tracked request, active or not, in sorted order
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = self.requests.keys().cloned().collect::<Vec<_>>();
        peers.sort();
        peers
    }

    /// True if a request for `peer` exists and has not ended
    pub fn is_active(&self, peer: &str) -> bool {
        self.request(peer).is_some_and(SensorDataRequest::is_active)
    }

    /// True if `peer` has an active request covering the sensor named
    /// `sensor_source`
    pub fn is_sensor_wanted(&self, peer: &str, sensor_source: &str) -> bool {
        self.requests.get(peer).is_some_and(|t| {
            t.request.is_active() && t.sensors.iter().any(|s| s.name == sensor_source)
        })
    }

    pub fn is_requesting_any(&self) -> bool {
        self.requests.values().any(|t| t.request.is_active())
    }

    /// End every active request now. Returns false, changing nothing, if
    /// no request was active, so callers can skip re-sending.
    pub fn stop_all(&mut self) -> bool {
        self.stop_all_at(now_millis())
    }

    pub fn stop_all_at(&mut self, timestamp: i64) -> bool {
        if !self.is_requesting_any() {
            return false;
        }
        log::debug!("Stopping all sensor data requests");
        self.requests
            .values_mut()
            .filter(|t| t.request.is_active())
            .for_each(|t| t.request.stop_at(timestamp));
        true
    }

    /// Serialize every tracked request and hand it to `send` along with the
    /// peer it belongs to. A failure for one peer is logged and collected;
    /// the remaining peers are still sent to.
    pub fn send_all<F>(&self, mut send: F) -> Vec<(PeerId, TransportError)>
    where
        F: FnMut(&PeerId, &[u8]) -> Result<(), TransportError>,
    {
        let mut failures = vec![];
        for peer in self.peers() {
            let Some(tracked) = self.requests.get(&peer) else {
                continue;
            };
            let payload = match tracked.request.to_json() {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("Unable to serialize request for {peer:}: {e:}");
                    continue;
                }
            };

            log::debug!(
                "Sending sensor data request to {peer:}: types {:?} end {}",
                tracked.request.sensor_types,
                tracked.request.end_timestamp
            );
            if let Err(e) = send(&peer, payload.as_bytes()) {
                log::warn!("Unable to send sensor data request to {peer:}: {e:}");
                failures.push((peer, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smind_sensor::TIMESTAMP_NOT_SET;

    fn heart_rate() -> DeviceSensor {
        DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE")
    }

    fn accelerometer() -> DeviceSensor {
        DeviceSensor::new(DeviceSensor::ACCELEROMETER, "ACCELEROMETER")
    }

    #[test]
    fn unknown_peer_is_never_active() {
        let manager = RequestManager::new();
        assert!(!manager.is_active("watch1"));
        assert!(!manager.is_sensor_wanted("watch1", "HEART_RATE"));
        assert!(!manager.is_requesting_any());
    }

    #[test]
    fn wanted_matches_selected_names() {
        let mut manager = RequestManager::new();
        let request = manager.set_request("watch1", vec![heart_rate(), accelerometer()], "phone");
        assert_eq!(request.sensor_types, vec![21, 1]);
        assert_eq!(request.end_timestamp, TIMESTAMP_NOT_SET);

        assert!(manager.is_active("watch1"));
        assert!(manager.is_sensor_wanted("watch1", "HEART_RATE"));
        assert!(manager.is_sensor_wanted("watch1", "ACCELEROMETER"));
        assert!(!manager.is_sensor_wanted("watch1", "GYROSCOPE"));
        assert!(!manager.is_sensor_wanted("watch2", "HEART_RATE"));
    }

    #[test]
    fn new_selection_replaces_old() {
        let mut manager = RequestManager::new();
        manager.set_request("watch1", vec![heart_rate()], "phone");
        manager.set_request("watch1", vec![accelerometer()], "phone");

        assert!(!manager.is_sensor_wanted("watch1", "HEART_RATE"));
        assert!(manager.is_sensor_wanted("watch1", "ACCELEROMETER"));
        assert_eq!(manager.peers(), vec!["watch1".to_string()]);
    }

    #[test]
    fn empty_selection_wants_nothing() {
        let mut manager = RequestManager::new();
        manager.set_request("watch1", vec![], "phone");
        assert!(manager.is_active("watch1"));
        assert!(!manager.is_sensor_wanted("watch1", "HEART_RATE"));
    }

    #[test]
    fn stop_all_ends_every_request() {
        let mut manager = RequestManager::new();
        manager.set_request("watch1", vec![heart_rate()], "phone");
        manager.set_request("watch2", vec![accelerometer()], "phone");

        assert!(manager.stop_all_at(42));
        for peer in ["watch1", "watch2"] {
            assert!(!manager.is_active(peer));
            assert!(!manager.is_sensor_wanted(peer, "HEART_RATE"));
            assert!(!manager.is_sensor_wanted(peer, "ACCELEROMETER"));
            assert_eq!(manager.request(peer).map(|r| r.end_timestamp), Some(42));
        }
    }

    #[test]
    fn second_stop_sends_nothing() {
        let mut manager = RequestManager::new();
        manager.set_request("watch1", vec![heart_rate()], "phone");

        let mut sent = vec![];
        if manager.stop_all() {
            manager.send_all(|peer, payload| {
                sent.push((peer.clone(), payload.to_vec()));
                Ok(())
            });
        }
        if manager.stop_all() {
            manager.send_all(|peer, payload| {
                sent.push((peer.clone(), payload.to_vec()));
                Ok(())
            });
        }

        assert_eq!(sent.len(), 1);
        let request = SensorDataRequest::from_slice(&sent[0].1).unwrap();
        assert!(!request.is_active());
        assert_ne!(request.end_timestamp, TIMESTAMP_NOT_SET);
    }

    #[test]
    fn send_failure_does_not_block_other_peers() {
        let mut manager = RequestManager::new();
        manager.set_request("a", vec![heart_rate()], "phone");
        manager.set_request("b", vec![heart_rate()], "phone");
        manager.set_request("c", vec![heart_rate()], "phone");

        let mut delivered = vec![];
        let failures = manager.send_all(|peer, _payload| {
            if peer == "b" {
                return Err(TransportError::Unreachable(peer.clone()));
            }
            delivered.push(peer.clone());
            Ok(())
        });

        assert_eq!(delivered, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "b");
    }

    #[test]
    fn stopped_requests_are_still_sent() {
        let mut manager = RequestManager::new();
        manager.set_request("watch1", vec![heart_rate()], "phone");
        manager.stop_all_at(7);

        let mut payloads = vec![];
        manager.send_all(|_peer, payload| {
            payloads.push(SensorDataRequest::from_slice(payload).unwrap());
            Ok(())
        });
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].end_timestamp, 7);
        assert_eq!(payloads[0].source_node_id, "phone");
    }
}
