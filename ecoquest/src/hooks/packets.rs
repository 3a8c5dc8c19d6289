use ecoquest_sync::{QueryError, Query, QueryObserver, QueryResult, QueryStatus, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

use super::{EcoQuest, NO_ACTIVE_RESOURCE};
use crate::api::Packet;
use crate::keys;

pub const PACKET_STALE_TIME: Duration = Duration::from_secs(30);

/// How a screen should render the packet query
#[derive(Debug, Clone)]
pub enum PacketState {
    /// Signed out, or not fetched yet
    Idle,
    Loading,
    Active(Arc<Packet>),
    /// The API answered 409: the user has no packet. Render the empty state.
    NoActivePacket,
    Failed(QueryError),
}

impl PacketState {
    pub fn from_result(result: &QueryResult<Packet>) -> Self {
        match result.status {
            QueryStatus::Idle => PacketState::Idle,
            QueryStatus::Fetching if result.data.is_none() => PacketState::Loading,
            QueryStatus::Error => match (&result.error, &result.data) {
                (Some(error), _) if error.is_status(NO_ACTIVE_RESOURCE) => PacketState::NoActivePacket,
                // Keep showing the last known packet while the refresh fails
                (_, Some(packet)) => PacketState::Active(packet.clone()),
                (Some(error), None) => PacketState::Failed(error.clone()),
                (None, None) => PacketState::Idle,
            },
            _ => match &result.data {
                Some(packet) => PacketState::Active(packet.clone()),
                None => PacketState::Idle,
            },
        }
    }

    pub fn packet(&self) -> Option<&Arc<Packet>> {
        match self {
            PacketState::Active(packet) => Some(packet),
            _ => None,
        }
    }
}

impl EcoQuest {
    pub fn my_packet_query(&self) -> Query<Packet> {
        let api = self.api.clone();
        Query::new(keys::packets_me(), move || {
            let api = api.clone();
            async move { api.my_packet().await }
        })
        .stale_time(PACKET_STALE_TIME)
        .retry(packet_retry(self.client.config().retry_policy()))
        .enabled(self.auth.is_authenticated())
    }

    pub fn use_my_packet(&self) -> QueryObserver<Packet> {
        self.client.use_query(self.my_packet_query())
    }
}

fn packet_retry(policy: RetryPolicy) -> RetryPolicy {
    policy.never_retry_status(NO_ACTIVE_RESOURCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: QueryStatus, data: Option<Packet>, error: Option<QueryError>) -> QueryResult<Packet> {
        QueryResult {
            data: data.map(Arc::new),
            status,
            error,
            is_fetching: status == QueryStatus::Fetching,
            is_stale: false,
            fetched_at: None,
            version: 1,
        }
    }

    fn packet() -> Packet {
        Packet {
            id: 1,
            title: "Plastic-free week".to_string(),
            tasks: Vec::new(),
            progress: 0.0,
            expires_at: None,
        }
    }

    #[test]
    fn test_no_active_packet() {
        let state = PacketState::from_result(&result(
            QueryStatus::Error,
            None,
            Some(QueryError::http(409, "no active packet")),
        ));
        assert!(matches!(state, PacketState::NoActivePacket));
    }

    #[test]
    fn test_failure_keeps_stale_packet() {
        let state = PacketState::from_result(&result(
            QueryStatus::Error,
            Some(packet()),
            Some(QueryError::http(503, "unavailable")),
        ));
        assert_eq!(state.packet().unwrap().id, 1);

        let state = PacketState::from_result(&result(
            QueryStatus::Error,
            None,
            Some(QueryError::http(503, "unavailable")),
        ));
        assert!(matches!(state, PacketState::Failed(_)));
    }

    #[test]
    fn test_loading_and_idle() {
        assert!(matches!(
            PacketState::from_result(&result(QueryStatus::Fetching, None, None)),
            PacketState::Loading
        ));
        assert!(matches!(
            PacketState::from_result(&result(QueryStatus::Idle, None, None)),
            PacketState::Idle
        ));
        assert!(matches!(
            PacketState::from_result(&result(QueryStatus::Fetching, Some(packet()), None)),
            PacketState::Active(_)
        ));
    }

    #[test]
    fn test_packet_retry_skips_conflict() {
        let policy = packet_retry(RetryPolicy::new(3));
        assert!(!policy.should_retry(&QueryError::http(409, "none"), 0));
        assert!(policy.should_retry(&QueryError::http(503, "busy"), 0));
    }
}
