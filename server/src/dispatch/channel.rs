//! Dispatch/correlation channel
//!
//! Moves commands to their target and delivers the resulting answer back
//! to the caller. Per target it guards a monotonically increasing sequence
//! counter, a one-permit FIFO slot serializing sequence-bound commands,
//! and the table of waiters keyed by sequence number.

use super::Transport;
use corral_shared::{
    registry, waiter_state::{WaiterLifecycle, WaiterState}, Answer, Command, CommandFrame,
    CommandKind, CommandPayload, Envelope,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcomes a caller can observe besides a delivered answer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Target not registered, or disconnected while the command was outstanding
    #[error("target unavailable")]
    TargetUnavailable,
    /// Wait budget exceeded; the remote side may still be working
    #[error("wait budget exceeded")]
    Timeout,
    /// A caller explicitly canceled the command
    #[error("canceled: {reason}")]
    Canceled { reason: String },
}

type Resolution = Result<Answer, DispatchError>;

/// Bookkeeping for one outstanding command
struct Waiter {
    tx: oneshot::Sender<Resolution>,
    kind: CommandKind,
    /// Sequencing policy result, evaluated once at submission time
    sequence_bound: bool,
    deadline: Instant,
    lifecycle: WaiterLifecycle,
}

/// Per-target dispatch state, created on registration and torn down on
/// disconnect
struct TargetState {
    /// Monotonic counter correlating commands with answers
    sequence: AtomicU64,
    /// One-permit fair semaphore: at most one sequence-bound command in
    /// flight per target, FIFO among queued submitters
    slot: Arc<Semaphore>,
    /// Waiters keyed by sequence number
    waiters: Mutex<HashMap<u64, Waiter>>,
}

impl TargetState {
    fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            slot: Arc::new(Semaphore::new(1)),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Dispatches commands to targets and correlates answers with callers
pub struct DispatchChannel {
    transport: Arc<dyn Transport>,
    targets: RwLock<HashMap<String, Arc<TargetState>>>,
}

impl DispatchChannel {
    /// Create a new dispatch channel over the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a target so it can receive commands
    pub async fn register_target(&self, target_id: &str) {
        let mut targets = self.targets.write().await;
        targets.insert(target_id.to_string(), Arc::new(TargetState::new()));
        info!(target = %target_id, "target registered");
    }

    /// Tear down a target: fail every pending waiter with
    /// `TargetUnavailable` and release queued submitters.
    ///
    /// State for other targets is untouched.
    pub async fn drop_target(&self, target_id: &str) {
        let state = self.targets.write().await.remove(target_id);
        let Some(state) = state else { return };

        // Queued sequence-bound submitters fail their acquire
        state.slot.close();

        let mut waiters = state.waiters.lock().await;
        let failed = waiters.len();
        for (sequence, mut waiter) in waiters.drain() {
            waiter.lifecycle.resolve(WaiterState::Unavailable);
            debug!(target = %target_id, sequence, kind = ?waiter.kind, "failing waiter on disconnect");
            let _ = waiter.tx.send(Err(DispatchError::TargetUnavailable));
        }

        info!(target = %target_id, failed_waiters = failed, "target dropped");
    }

    /// Whether a target is currently registered
    pub async fn has_target(&self, target_id: &str) -> bool {
        self.targets.read().await.contains_key(target_id)
    }

    /// Number of outstanding waiters for a target
    pub async fn pending_count(&self, target_id: &str) -> usize {
        match self.targets.read().await.get(target_id) {
            Some(state) => state.waiters.lock().await.len(),
            None => 0,
        }
    }

    /// Send a command and wait for its answer.
    ///
    /// Sequence-bound commands queue FIFO behind any outstanding
    /// sequence-bound command for the same target; others dispatch
    /// immediately. Resolution is guaranteed within the wait budget: the
    /// supervisor expires overdue waiters.
    pub async fn submit(&self, target_id: &str, command: Command) -> Result<Answer, DispatchError> {
        let state = self
            .targets
            .read()
            .await
            .get(target_id)
            .cloned()
            .ok_or(DispatchError::TargetUnavailable)?;

        let sequence_bound = registry::is_sequence_bound(&command);
        let wait = Duration::from_secs(registry::effective_wait_secs(&command));
        let kind = command.kind();

        // Hold the target's slot for the whole flight of a sequence-bound
        // command; dropping it on return wakes the next queued submitter.
        let _permit = if sequence_bound {
            match state.slot.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                // Closed by drop_target while we were queued
                Err(_) => return Err(DispatchError::TargetUnavailable),
            }
        } else {
            None
        };

        let sequence = state.next_sequence();
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = state.waiters.lock().await;
            waiters.insert(
                sequence,
                Waiter {
                    tx,
                    kind,
                    sequence_bound,
                    deadline: Instant::now() + wait,
                    lifecycle: WaiterLifecycle::new(),
                },
            );
        }

        let frame = Envelope::Command(CommandFrame { sequence, command });
        if let Err(e) = self.transport.transmit(target_id, &frame).await {
            state.waiters.lock().await.remove(&sequence);
            warn!(target = %target_id, sequence, kind = ?kind, error = %e, "transmit failed");
            return Err(DispatchError::TargetUnavailable);
        }

        // The target may have been dropped between the state lookup and the
        // waiter registration; re-check so this waiter cannot be orphaned
        // past drop_target's drain.
        if !self.targets.read().await.contains_key(target_id) {
            state.waiters.lock().await.remove(&sequence);
            return Err(DispatchError::TargetUnavailable);
        }

        debug!(
            target = %target_id,
            sequence,
            kind = ?kind,
            sequence_bound,
            wait_secs = wait.as_secs(),
            "command sent"
        );

        match rx.await {
            Ok(resolution) => resolution,
            // Waiter dropped without resolution; only reachable if target
            // state was torn down mid-flight
            Err(_) => Err(DispatchError::TargetUnavailable),
        }
    }

    /// Deliver an answer from the transport layer to its waiter.
    ///
    /// Answers with no matching waiter (stale, duplicate, or arriving
    /// after timeout/cancel) are dropped with a log line and no other side
    /// effects.
    pub async fn handle_answer(&self, target_id: &str, sequence: u64, answer: Answer) {
        let state = match self.targets.read().await.get(target_id).cloned() {
            Some(state) => state,
            None => {
                warn!(target = %target_id, sequence, "dropping answer for unknown target");
                return;
            }
        };

        let waiter = state.waiters.lock().await.remove(&sequence);
        match waiter {
            Some(mut waiter) => {
                waiter.lifecycle.resolve(WaiterState::Answered);
                debug!(
                    target = %target_id,
                    sequence,
                    kind = ?waiter.kind,
                    success = answer.success,
                    "answer delivered"
                );
                if waiter.tx.send(Ok(answer)).is_err() {
                    debug!(target = %target_id, sequence, "caller gone before answer delivery");
                }
            }
            None => {
                warn!(target = %target_id, sequence, "dropping answer with no matching waiter");
            }
        }
    }

    /// Explicit caller-driven cancellation of an outstanding command.
    ///
    /// Resolves the local waiter immediately and fire-and-forgets a cancel
    /// command to the target; the remote side is not guaranteed to abort
    /// before completing the original command's side effects.
    pub async fn cancel(
        &self,
        target_id: &str,
        sequence: u64,
        reason: &str,
    ) -> Result<(), DispatchError> {
        let state = self
            .targets
            .read()
            .await
            .get(target_id)
            .cloned()
            .ok_or(DispatchError::TargetUnavailable)?;

        let waiter = state.waiters.lock().await.remove(&sequence);
        match waiter {
            Some(mut waiter) => {
                waiter.lifecycle.resolve(WaiterState::Canceled);
                info!(target = %target_id, sequence, kind = ?waiter.kind, reason, "command canceled");
                let _ = waiter.tx.send(Err(DispatchError::Canceled {
                    reason: reason.to_string(),
                }));
            }
            None => {
                debug!(target = %target_id, sequence, "cancel for unknown or already-resolved command");
            }
        }

        self.send_cancel(&state, target_id, sequence, reason).await;
        Ok(())
    }

    /// Resolve every waiter whose deadline has passed, issuing a cancel
    /// for each. Called by the timeout supervisor; returns how many
    /// waiters expired.
    pub async fn expire_deadlines(&self) -> usize {
        let now = Instant::now();
        let targets: Vec<(String, Arc<TargetState>)> = self
            .targets
            .read()
            .await
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        let mut expired_total = 0;
        for (target_id, state) in targets {
            let overdue: Vec<(u64, Waiter)> = {
                let mut waiters = state.waiters.lock().await;
                let sequences: Vec<u64> = waiters
                    .iter()
                    .filter(|(_, w)| w.deadline <= now)
                    .map(|(s, _)| *s)
                    .collect();
                sequences
                    .into_iter()
                    .filter_map(|s| waiters.remove(&s).map(|w| (s, w)))
                    .collect()
            };

            for (sequence, mut waiter) in overdue {
                waiter.lifecycle.resolve(WaiterState::TimedOut);
                warn!(
                    target = %target_id,
                    sequence,
                    kind = ?waiter.kind,
                    sequence_bound = waiter.sequence_bound,
                    "command timed out; issuing cancel"
                );
                // Unblock the caller first; the cancel is fire-and-forget
                let _ = waiter.tx.send(Err(DispatchError::Timeout));
                self.send_cancel(&state, &target_id, sequence, "wait budget exceeded")
                    .await;
                expired_total += 1;
            }
        }
        expired_total
    }

    /// Fire-and-forget a cancel command for (target, sequence).
    ///
    /// The cancel rides its own sequence number, is never sequence-bound
    /// (so it overtakes a stuck sequence-bound command), and registers no
    /// waiter.
    async fn send_cancel(&self, state: &TargetState, target_id: &str, victim: u64, reason: &str) {
        let cancel_seq = state.next_sequence();
        let command = Command::new(CommandPayload::Cancel {
            sequence: victim,
            reason: reason.to_string(),
        });
        let frame = Envelope::Command(CommandFrame {
            sequence: cancel_seq,
            command,
        });
        if let Err(e) = self.transport.transmit(target_id, &frame).await {
            debug!(target = %target_id, victim, error = %e, "cancel transmit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_shared::AnswerPayload;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{advance, sleep};

    /// Records every transmitted frame; never answers on its own
    struct RecordingTransport {
        sent: StdMutex<Vec<(String, CommandFrame)>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
            })
        }

        fn sent_frames(&self) -> Vec<(String, CommandFrame)> {
            self.sent.lock().unwrap().clone()
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn transmit(&self, target_id: &str, envelope: &Envelope) -> anyhow::Result<()> {
            if let Envelope::Command(frame) = envelope {
                self.sent
                    .lock()
                    .unwrap()
                    .push((target_id.to_string(), frame.clone()));
            }
            Ok(())
        }
    }

    fn start_vm(name: &str) -> Command {
        Command::new(CommandPayload::StartVm {
            vm_name: name.into(),
            system_vm: false,
            cpu_mhz: 500,
            ram_mb: 512,
        })
    }

    fn ping() -> Command {
        Command::new(CommandPayload::Ping {
            include_stats: false,
        })
    }

    /// Let spawned tasks make progress under paused time
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_unknown_target_fails_immediately() {
        let transport = RecordingTransport::new();
        let channel = DispatchChannel::new(transport.clone());

        let result = channel.submit("nowhere", ping()).await;
        assert_eq!(result, Err(DispatchError::TargetUnavailable));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_per_target() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        // Three sequence-bound commands from different submitters, in order
        let mut joins = Vec::new();
        for name in ["vm-a", "vm-b", "vm-c"] {
            let channel = channel.clone();
            joins.push(tokio::spawn(async move {
                channel.submit("h1", start_vm(name)).await
            }));
            // Let each submitter reach the slot queue before the next
            settle().await;
        }

        // Only the first is on the wire; the rest queue behind the slot
        assert_eq!(transport.sent_count(), 1);
        let first = transport.sent_frames()[0].1.clone();
        assert_eq!(first.sequence, 1);

        channel.handle_answer("h1", 1, Answer::success()).await;
        settle().await;
        assert_eq!(transport.sent_count(), 2);

        channel.handle_answer("h1", 2, Answer::success()).await;
        settle().await;
        assert_eq!(transport.sent_count(), 3);

        channel.handle_answer("h1", 3, Answer::success()).await;

        for join in joins {
            let answer = join.await.unwrap().unwrap();
            assert!(answer.success);
        }

        // Wire order equals submission order
        let names: Vec<String> = transport
            .sent_frames()
            .iter()
            .map(|(_, f)| match &f.command.payload {
                CommandPayload::StartVm { vm_name, .. } => vm_name.clone(),
                other => panic!("unexpected payload: {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["vm-a", "vm-b", "vm-c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_sequence_bound_overlap() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        // Sequence-bound command left outstanding
        let blocked = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-slow")).await })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 1);

        // A ping overtakes it
        let ping_join = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", ping()).await })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 2, "ping must not queue behind the slot");

        let ping_seq = transport.sent_frames()[1].1.sequence;
        channel
            .handle_answer(
                "h1",
                ping_seq,
                Answer::success_with(AnswerPayload::Ping {
                    host_uptime_secs: 5,
                    vm_count: 0,
                }),
            )
            .await;

        let answer = ping_join.await.unwrap().unwrap();
        assert!(answer.success);

        // The sequence-bound command is still pending, then completes
        assert_eq!(channel.pending_count("h1").await, 1);
        channel.handle_answer("h1", 1, Answer::success()).await;
        assert!(blocked.await.unwrap().unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cross_target_blocking() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;
        channel.register_target("h2").await;

        let _stuck = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-a")).await })
        };
        settle().await;

        // h2 commands flow regardless of h1's occupied slot
        let h2_join = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h2", start_vm("vm-b")).await })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 2);

        let h2_seq = transport
            .sent_frames()
            .iter()
            .find(|(t, _)| t == "h2")
            .unwrap()
            .1
            .sequence;
        channel.handle_answer("h2", h2_seq, Answer::success()).await;
        assert!(h2_join.await.unwrap().unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_issues_cancel_and_at_most_one_resolution() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        let join = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel.submit("h1", start_vm("vm-a").with_wait(5)).await
            })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 1);

        // Before the deadline nothing expires
        advance(Duration::from_secs(4)).await;
        assert_eq!(channel.expire_deadlines().await, 0);

        advance(Duration::from_secs(2)).await;
        assert_eq!(channel.expire_deadlines().await, 1);

        // Caller got exactly one resolution: the timeout
        let result = join.await.unwrap();
        assert_eq!(result, Err(DispatchError::Timeout));

        // A cancel went on the wire for the victim sequence
        let frames = transport.sent_frames();
        assert_eq!(frames.len(), 2);
        match &frames[1].1.command.payload {
            CommandPayload::Cancel { sequence, .. } => assert_eq!(*sequence, 1),
            other => panic!("expected cancel, got {:?}", other),
        }

        // Late answer after timeout is dropped without side effects
        channel.handle_answer("h1", 1, Answer::success()).await;
        assert_eq!(channel.pending_count("h1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_sequence_slot() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        let stuck = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel.submit("h1", start_vm("vm-stuck").with_wait(3)).await
            })
        };
        settle().await;

        let queued = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-next")).await })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 1, "second command queued");

        advance(Duration::from_secs(4)).await;
        channel.expire_deadlines().await;
        assert_eq!(stuck.await.unwrap(), Err(DispatchError::Timeout));

        // The queued command acquires the freed slot and goes on the wire
        settle().await;
        let frames = transport.sent_frames();
        let next = frames
            .iter()
            .find(|(_, f)| matches!(&f.command.payload, CommandPayload::StartVm { vm_name, .. } if vm_name == "vm-next"))
            .expect("queued command should have been sent");
        channel
            .handle_answer("h1", next.1.sequence, Answer::success())
            .await;
        assert!(queued.await.unwrap().unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        let join = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-a")).await })
        };
        settle().await;

        channel.cancel("h1", 1, "operator abort").await.unwrap();
        let result = join.await.unwrap();
        assert_eq!(
            result,
            Err(DispatchError::Canceled {
                reason: "operator abort".into()
            })
        );

        // Cancel frame on the wire, and a duplicate cancel is harmless
        assert_eq!(transport.sent_count(), 2);
        channel.cancel("h1", 1, "again").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_target_cleanup() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        // One in flight, one queued behind the slot
        let in_flight = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-a")).await })
        };
        settle().await;
        let queued = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-b")).await })
        };
        settle().await;

        channel.drop_target("h1").await;

        assert_eq!(in_flight.await.unwrap(), Err(DispatchError::TargetUnavailable));
        assert_eq!(queued.await.unwrap(), Err(DispatchError::TargetUnavailable));
        assert!(!channel.has_target("h1").await);

        // A subsequent answer for the dropped target is discarded
        channel.handle_answer("h1", 1, Answer::success()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_answer_dropped() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        let join = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", ping()).await })
        };
        settle().await;

        channel.handle_answer("h1", 1, Answer::success()).await;
        let answer = join.await.unwrap().unwrap();
        assert!(answer.success);

        // Second answer for the same sequence has nothing to resolve
        channel
            .handle_answer("h1", 1, Answer::failed("late duplicate"))
            .await;
        assert_eq!(channel.pending_count("h1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_vm_command_overtakes_sequence_slot() {
        let transport = RecordingTransport::new();
        let channel = Arc::new(DispatchChannel::new(transport.clone()));
        channel.register_target("h1").await;

        let _stuck = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.submit("h1", start_vm("vm-user")).await })
        };
        settle().await;

        // Restarting a virtual router must not queue behind the user VM
        let router = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel
                    .submit(
                        "h1",
                        Command::new(CommandPayload::RebootVm {
                            vm_name: "v-4-VM".into(),
                            system_vm: true,
                        }),
                    )
                    .await
            })
        };
        settle().await;
        assert_eq!(transport.sent_count(), 2);

        let router_seq = transport.sent_frames()[1].1.sequence;
        channel
            .handle_answer("h1", router_seq, Answer::success())
            .await;
        assert!(router.await.unwrap().unwrap().success);
    }
}
