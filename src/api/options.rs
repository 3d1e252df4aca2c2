use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct KvOptions {
    /// Snapshot and compact once the retained log is longer than this many entries.
    pub snapshot_threshold: Option<u64>,
    pub snapshot_catch_up_entries: Option<u64>,
    pub proposal_queue_size: Option<usize>,
    /// How long a request handler waits for room in the proposal queue before answering 503.
    pub proposal_timeout: Option<Duration>,
    pub max_request_body_bytes: Option<usize>,
}

pub(super) struct KvOptionsValidated {
    pub snapshot_threshold: u64,
    pub snapshot_catch_up_entries: u64,
    pub proposal_queue_size: usize,
    pub proposal_timeout: Duration,
    pub max_request_body_bytes: usize,
}

impl KvOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.snapshot_threshold == 0 {
            return Err("Snapshot threshold must be greater than zero");
        }
        if self.snapshot_catch_up_entries >= self.snapshot_threshold {
            return Err("Snapshot catch-up entries must be less than the snapshot threshold");
        }
        if self.proposal_queue_size == 0 {
            return Err("Proposal queue size must be greater than zero");
        }
        if self.proposal_timeout.is_zero() {
            return Err("Proposal timeout must be greater than zero");
        }

        Ok(())
    }
}

impl TryFrom<KvOptions> for KvOptionsValidated {
    type Error = &'static str;

    fn try_from(options: KvOptions) -> Result<Self, Self::Error> {
        let values = KvOptionsValidated {
            snapshot_threshold: options.snapshot_threshold.unwrap_or(1000),
            snapshot_catch_up_entries: options.snapshot_catch_up_entries.unwrap_or(100),
            proposal_queue_size: options.proposal_queue_size.unwrap_or(64),
            proposal_timeout: options.proposal_timeout.unwrap_or(Duration::from_secs(1)),
            max_request_body_bytes: options.max_request_body_bytes.unwrap_or(1024 * 1024),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = KvOptionsValidated::try_from(KvOptions::default()).unwrap();
        assert_eq!(options.snapshot_threshold, 1000);
        assert_eq!(options.snapshot_catch_up_entries, 100);
        assert_eq!(options.proposal_queue_size, 64);
        assert_eq!(options.proposal_timeout, Duration::from_secs(1));
        assert_eq!(options.max_request_body_bytes, 1024 * 1024);
    }

    #[test]
    fn catch_up_must_be_below_threshold() {
        let options = KvOptions {
            snapshot_threshold: Some(10),
            snapshot_catch_up_entries: Some(10),
            ..KvOptions::default()
        };
        assert!(KvOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn rejects_zero_values() {
        let zero_queue = KvOptions {
            proposal_queue_size: Some(0),
            ..KvOptions::default()
        };
        assert!(KvOptionsValidated::try_from(zero_queue).is_err());

        let zero_timeout = KvOptions {
            proposal_timeout: Some(Duration::from_secs(0)),
            ..KvOptions::default()
        };
        assert!(KvOptionsValidated::try_from(zero_timeout).is_err());
    }
}
