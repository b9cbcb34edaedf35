//! Common test utilities for deployment integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use courier_deploy::{
    BuildLogger, DeployError, DeployParams, DeployResult, DeploymentId, DeploymentRequest,
    DeploymentService, DeploymentStatus, Revision,
};
use parking_lot::Mutex;

/// Deployment service replaying a scripted sequence of statuses.
///
/// Once the script runs out the last status is repeated.
#[derive(Debug, Default)]
pub struct ScriptedService {
    statuses: Mutex<VecDeque<DeploymentStatus>>,
    last: Mutex<Option<DeploymentStatus>>,
    pub registered: Mutex<Vec<(String, Revision)>>,
    pub requests: Mutex<Vec<DeploymentRequest>>,
    pub stopped: Mutex<Vec<DeploymentId>>,
    pub polls: Mutex<usize>,
    pub reject_registration: bool,
}

impl ScriptedService {
    pub fn new(statuses: impl IntoIterator<Item = DeploymentStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn rejecting_registration() -> Arc<Self> {
        Arc::new(Self {
            reject_registration: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl DeploymentService for ScriptedService {
    async fn register_revision(&self, application: &str, revision: &Revision) -> DeployResult<()> {
        if self.reject_registration {
            return Err(DeployError::Service(format!(
                "application {application} does not exist"
            )));
        }
        self.registered
            .lock()
            .push((application.to_owned(), revision.clone()));
        Ok(())
    }

    async fn create_deployment(&self, request: &DeploymentRequest) -> DeployResult<DeploymentId> {
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        Ok(DeploymentId::new(format!("d-{}", requests.len())))
    }

    async fn deployment_status(&self, _id: &DeploymentId) -> DeployResult<DeploymentStatus> {
        *self.polls.lock() += 1;
        let next = self.statuses.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(status) = next {
            *last = Some(status);
        }
        Ok(last.clone().unwrap_or(DeploymentStatus::InProgress))
    }

    async fn stop_deployment(&self, id: &DeploymentId) -> DeployResult<()> {
        self.stopped.lock().push(id.clone());
        Ok(())
    }
}

/// One line written to a [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Message(String),
    Error(String),
    Debug(String),
    Problem { kind: String, description: String },
}

/// Build logger keeping everything it is given.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    pub lines: Mutex<Vec<LogLine>>,
}

impl RecordingLogger {
    pub fn problems(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| match line {
                LogLine::Problem { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contains_message(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|line| matches!(line, LogLine::Message(text) if text.contains(needle)))
    }
}

impl BuildLogger for RecordingLogger {
    fn message(&self, text: &str) {
        self.lines.lock().push(LogLine::Message(text.to_owned()));
    }

    fn error(&self, text: &str) {
        self.lines.lock().push(LogLine::Error(text.to_owned()));
    }

    fn debug(&self, text: &str) {
        self.lines.lock().push(LogLine::Debug(text.to_owned()));
    }

    fn problem(&self, _identity: i32, kind: &str, description: &str) {
        self.lines.lock().push(LogLine::Problem {
            kind: kind.to_owned(),
            description: description.to_owned(),
        });
    }
}

/// Parameters deploying `revision` from `base_dir`.
pub fn params(base_dir: &Path, revision: &str) -> DeployParams {
    DeployParams {
        revision_path: revision.into(),
        base_dir: Some(base_dir.to_path_buf()),
        bucket: "releases".to_owned(),
        key_prefix: Some("shop".to_owned()),
        region: None,
        endpoint: None,
        access_key_id: None,
        secret_access_key: None,
        application: "shop".to_owned(),
        deployment_group: "prod".to_owned(),
        deployment_config: Some("OneAtATime".to_owned()),
        description: Some("build 42".to_owned()),
    }
}
