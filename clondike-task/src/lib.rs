//! Per-migrated-process task controller: the method pump, Shadow/Guest role
//! logic, and post-fork handling (spec. §4.3).

pub mod guest;
pub mod pidfd;
pub mod postfork;
pub mod pump;
pub mod shadow;
pub mod signalfd;

pub use pump::{ExecveContext, Method, PeerLink, PumpStatus, Task, TaskRole};

#[cfg(test)]
mod tests {
    use super::*;
    use clondike_wire::{Envelope, MessageId, Result};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingLink {
        sent: Mutex<Vec<Envelope>>,
        fail: bool,
    }

    impl PeerLink for RecordingLink {
        fn send(&self, env: Envelope) -> Result<()> {
            if self.fail {
                return Err(clondike_wire::ClondikeError::PeerLost);
            }
            self.sent.lock().push(env);
            Ok(())
        }
    }

    #[test]
    fn submit_then_flush_and_submit_drains_queue() {
        let link = Arc::new(RecordingLink::default());
        let task = Task::new(TaskRole::Shadow, 1, link);
        task.submit(Method::ProcessMsg { wait_for_msgs: false });
        task.submit(Method::ProcessMsg { wait_for_msgs: false });
        task.flush_and_submit(Method::Exit { code: 7 });

        let first = task.run_pump(
            |_task, method| {
                Ok(match method {
                    Method::Exit { code } => {
                        assert_eq!(code, 7);
                        PumpStatus::KillMe
                    }
                    _ => panic!("flush_and_submit should have drained the earlier methods"),
                })
            },
            |_task| Ok(None),
        );
        assert_eq!(first, PumpStatus::KillMe);
    }

    #[test]
    fn guest_exit_forwards_exit_message() {
        let link = Arc::new(RecordingLink::default());
        let task = Task::new(TaskRole::Guest, 42, link.clone());
        let status = guest::handle_exit(&task, 5).unwrap();
        assert_eq!(status, PumpStatus::RemoveAndLetMeGo);
        assert_eq!(link.sent.lock().len(), 1);
        assert_eq!(link.sent.lock()[0].header.id, MessageId::Exit);
    }

    #[test]
    fn shadow_migrate_back_ppm_sends_async_request() {
        let link = Arc::new(RecordingLink::default());
        let task = Task::new(TaskRole::Shadow, 1, link.clone());
        task.remote_pid.store(99, std::sync::atomic::Ordering::SeqCst);
        shadow::migrate_home_ppm(&task).unwrap();
        let sent = link.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.id, MessageId::PpmMigrBackShadowReq);
        assert_eq!(sent[0].header.transaction_id, clondike_wire::TRANSACTION_ID_INVAL);
    }

    #[test]
    fn guest_migrate_back_npm_send_failure_keeps_task_alive() {
        let link = Arc::new(RecordingLink { fail: true, ..Default::default() });
        let task = Task::new(TaskRole::Guest, 7, link);
        let wire_npm = clondike_wire::payload::NpmParams { argv: vec![], envp: vec![], filename: "/bin/sh".into() };
        let status = guest::migrate_back_npm(&task, "/tmp/x.ckpt", wire_npm).unwrap();
        assert_eq!(status, PumpStatus::RemoveAndLetMeGo);
    }

    #[test]
    fn forwarding_signal_after_peer_loss_sets_peer_lost_flag() {
        let link = Arc::new(RecordingLink { fail: true, ..Default::default() });
        let task = Task::new(TaskRole::Shadow, std::process::id() as i32, link);
        shadow::forward_signal(&task, libc::SIGUSR1, 0).unwrap();
        assert!(task.peer_lost.load(std::sync::atomic::Ordering::SeqCst));
    }
}
