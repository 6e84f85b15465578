//! Timeout tracking for outstanding commands

use super::channel::DispatchChannel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

/// Scans waiter deadlines and expires overdue commands.
///
/// Expiry unblocks the local caller with a timeout and fire-and-forgets a
/// cancel to the target; it never waits on the cancel's own outcome.
pub struct TimeoutSupervisor {
    channel: Arc<DispatchChannel>,
    check_interval: Duration,
}

impl TimeoutSupervisor {
    /// Create a supervisor with the default 1s scan interval
    pub fn new(channel: Arc<DispatchChannel>) -> Self {
        Self::with_interval(channel, Duration::from_millis(1000))
    }

    pub fn with_interval(channel: Arc<DispatchChannel>, check_interval: Duration) -> Self {
        Self {
            channel,
            check_interval,
        }
    }

    /// Run the deadline scan loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            let expired = self.channel.expire_deadlines().await;
            if expired > 0 {
                debug!(expired, "expired overdue commands");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchError, Transport};
    use corral_shared::{Command, CommandPayload, Envelope};
    use tokio::time::advance;

    struct SilentTransport;

    #[async_trait::async_trait]
    impl Transport for SilentTransport {
        async fn transmit(&self, _target: &str, _envelope: &Envelope) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_expires_overdue_command() {
        let channel = Arc::new(DispatchChannel::new(Arc::new(SilentTransport)));
        channel.register_target("h1").await;

        let supervisor = TimeoutSupervisor::new(channel.clone());
        tokio::spawn(async move { supervisor.run().await });

        let join = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let command = Command::new(CommandPayload::GetHostStats {
                    host_guid: "guid-1".into(),
                })
                .with_wait(5);
                channel.submit("h1", command).await
            })
        };

        // The caller is released at its deadline, not later
        advance(Duration::from_secs(6)).await;
        let result = join.await.unwrap();
        assert_eq!(result, Err(DispatchError::Timeout));
        assert_eq!(channel.pending_count("h1").await, 0);
    }
}
