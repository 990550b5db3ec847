use std::time::Duration;

use m2_api::{BridgeError, Clock, RemoteStatus};
use m2_connectors::StatusReport;

pub const RC_STOPPED: i32 = 103;
pub const RC_FAILED: i32 = 104;

/// The two status lifecycles the control plane reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVocabulary {
    Application,
    BatchExecution,
}

impl StatusVocabulary {
    pub fn terminal_states(self) -> &'static [&'static str] {
        match self {
            StatusVocabulary::Application => &["Running", "Stopped", "Failed"],
            StatusVocabulary::BatchExecution => {
                &["Cancelled", "Succeeded", "Failed", "Succeeded With Warning"]
            }
        }
    }

    pub fn is_terminal(self, status: &RemoteStatus) -> bool {
        self.terminal_states().contains(&status.as_str())
    }

    pub fn return_code(self, status: &RemoteStatus) -> i32 {
        match status.as_str() {
            "Failed" => RC_FAILED,
            "Stopped" | "Cancelled" => RC_STOPPED,
            _ => 0,
        }
    }

    pub fn message(self, status: &RemoteStatus) -> String {
        match (self, status.as_str()) {
            (StatusVocabulary::Application, "Running") => {
                "Task completed successfully. Application is running.".to_string()
            }
            (StatusVocabulary::Application, s) => {
                format!("Task failed because of the status of the Application. Status = {s}")
            }
            (StatusVocabulary::BatchExecution, "Succeeded") => {
                "Task completed successfully.".to_string()
            }
            (StatusVocabulary::BatchExecution, "Succeeded With Warning") => {
                "Task completed successfully but there are some warnings.".to_string()
            }
            (StatusVocabulary::BatchExecution, s) => format!(
                "Task failed because of the status of the AWS Batch Job Status. Status = {s}"
            ),
        }
    }
}

/// Terminal observation of a polled resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: RemoteStatus,
    pub rc: i32,
    pub message: String,
    /// Raw body of the terminal status response.
    pub body: String,
    pub polls: u32,
}

/// Fixed-interval status poller.
///
/// Sleeps only between non-terminal observations. Query errors are returned
/// as-is. Without a deadline the loop runs until a terminal status shows up.
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    interval: Duration,
    deadline: Option<Duration>,
}

impl<'a> Poller<'a> {
    pub fn new(clock: &'a dyn Clock, interval: Duration, deadline: Option<Duration>) -> Self {
        Self {
            clock,
            interval,
            deadline,
        }
    }

    pub fn wait_until_terminal<F>(
        &self,
        vocabulary: StatusVocabulary,
        mut query: F,
    ) -> Result<PollOutcome, BridgeError>
    where
        F: FnMut() -> Result<StatusReport, BridgeError>,
    {
        let started = self.clock.now();
        let mut polls = 0u32;
        loop {
            let report = query()?;
            polls += 1;

            if vocabulary.is_terminal(&report.status) {
                tracing::info!(status = %report.status, polls, ?vocabulary, "reached terminal status");
                return Ok(PollOutcome {
                    rc: vocabulary.return_code(&report.status),
                    message: vocabulary.message(&report.status),
                    status: report.status,
                    body: report.body,
                    polls,
                });
            }

            let waited = self.clock.now().saturating_duration_since(started);
            if let Some(limit) = self.deadline {
                if waited + self.interval > limit {
                    return Err(BridgeError::PollDeadline {
                        waited_secs: waited.as_secs(),
                        last_status: report.status.0,
                    });
                }
            }

            tracing::debug!(status = %report.status, polls, interval = ?self.interval, "status not terminal yet");
            self.clock.sleep(self.interval);
        }
    }
}
