use serde::Deserialize;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for the replica. Every value is optional; unset values fall back to defaults.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RaftOptions {
    pub tick_interval_ms: Option<u64>,
    pub election_timeout_min_ms: Option<u64>,
    pub election_timeout_max_ms: Option<u64>,
    pub rpc_timeout_ms: Option<u64>,
    pub apply_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub(crate) struct RaftOptionsValidated {
    pub tick_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub rpc_timeout: Duration,
    pub apply_timeout: Duration,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.rpc_timeout >= self.tick_interval {
            return Err("Peer RPC timeout must be less than the tick interval");
        }
        if self.tick_interval >= self.election_timeout_min {
            return Err("Election timeout minimum must be greater than the tick interval");
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err("Election timeout minimum must be less than maximum");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let millis = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        let values = RaftOptionsValidated {
            tick_interval: millis(options.tick_interval_ms, 100),
            election_timeout_min: millis(options.election_timeout_min_ms, 300),
            election_timeout_max: millis(options.election_timeout_max_ms, 500),
            rpc_timeout: millis(options.rpc_timeout_ms, 75),
            apply_timeout: millis(options.apply_timeout_ms, 5000),
        };

        values.validate()?;
        Ok(values)
    }
}
