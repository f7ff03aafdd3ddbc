mod heartbeat;
mod policy_cleanup;

pub use heartbeat::HeartbeatTask;
pub use policy_cleanup::PolicyCleanupTask;
