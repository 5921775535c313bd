//! Message types for actor communication.

use ractor::RpcReplyPort;

use crate::promoter::TickReport;

/// Messages for the PromoterActor.
#[derive(Debug)]
pub enum PromoterMessage {
    /// Run one promotion tick, then re-arm.
    Tick,

    /// Totals over every tick since start.
    GetTotals { reply: RpcReplyPort<TickReport> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim and execute one job, then re-arm.
    Poll,

    /// Number of claimed ids handled since start.
    GetProcessed { reply: RpcReplyPort<u64> },
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Report running children.
    Status { reply: RpcReplyPort<SupervisorStatus> },

    /// Stop all children, then the supervisor.
    Shutdown,
}

/// Snapshot of the supervisor's children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub promoters: usize,
    pub workers: usize,
    /// Children restarted after a failure.
    pub restarts: u64,
}
