//! Broker channel names and server message type constants.
//!
//! Publishers and the WebSocket broker must agree on both, so they live
//! next to the bus rather than in either side.

use stampede_core::types::DbId;

/// Platform-wide metrics, published by the snapshot loop.
pub const SYSTEM: &str = "system";

/// Node capacity updates.
pub const NODES: &str = "nodes";

/// Every job's lifecycle updates (admin only).
pub const JOBS: &str = "jobs";

/// Prefix of per-job channels (`job:{id}`).
pub const JOB_PREFIX: &str = "job:";

/// Server message type: connection accepted and authenticated.
pub const MSG_WELCOME: &str = "welcome";
/// Server message type: liveness ping.
pub const MSG_HEARTBEAT: &str = "heartbeat";
/// Server message type: subscribe/unsubscribe acknowledgement.
pub const MSG_SUBSCRIPTION_CONFIRMED: &str = "subscription_confirmed";
/// Server message type: aggregated platform metrics.
pub const MSG_SYSTEM_METRICS: &str = "system_metrics";
/// Server message type: job state or script event.
pub const MSG_JOB_UPDATE: &str = "job_update";
/// Server message type: node state.
pub const MSG_NODE_UPDATE: &str = "node_update";
/// Server message type: request could not be honoured.
pub const MSG_ERROR: &str = "error";

/// Channel carrying updates for one job.
pub fn job(job_id: DbId) -> String {
    format!("{JOB_PREFIX}{job_id}")
}

/// Parse the job id out of a `job:{id}` channel name.
pub fn parse_job(channel: &str) -> Option<DbId> {
    channel.strip_prefix(JOB_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_channel_round_trips() {
        assert_eq!(job(123), "job:123");
        assert_eq!(parse_job("job:123"), Some(123));
    }

    #[test]
    fn parse_job_rejects_other_channels() {
        assert_eq!(parse_job("nodes"), None);
        assert_eq!(parse_job("job:"), None);
        assert_eq!(parse_job("job:abc"), None);
    }
}
