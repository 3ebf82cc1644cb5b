//! 归档会话状态
//!
//! 跟踪归档可用性和加载状态，供界面渲染：
//! - 不可达：归档探测失败，刷新不发起任何请求
//! - 加载中：同一时间最多一个聚合在进行，重复刷新合并到进行中的聚合
//! - 失败：保留错误信息，上一次成功的快照保持不变
//! - 已加载：持有按患者分组的检查列表
//!
//! 每次聚合分配递增的序号，只有序号与当前进行中聚合一致的结果才会被采用。

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use pacs_archive::{ArchiveClient, ArchiveConfig};
use pacs_core::{GroupedPatientStudy, Instance, PacsError, Result, Series, SystemInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::aggregator::HierarchyAggregator;
use crate::state_machine::{LoadEvent, LoadPhase, LoadStateMachine};

/// 加载失败时展示给用户的信息
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load studies from archive";

/// 归档可用性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unchecked,
    Checking,
    Available,
    Unavailable,
}

/// 界面可渲染的会话状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// 尚未完成可用性检查
    Unchecked,
    /// 归档不可达
    Unreachable,
    /// 归档可用但尚未加载
    Idle,
    Loading,
    Failed { message: String },
    Loaded { group_count: usize },
}

/// 一次成功聚合的结果
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub loaded_at: DateTime<Utc>,
    pub groups: Vec<GroupedPatientStudy>,
}

struct InFlight {
    sequence: u64,
    done: Shared<BoxFuture<'static, ()>>,
}

struct SessionState {
    availability: Availability,
    phase: LoadPhase,
    error: Option<String>,
    snapshot: Option<Arc<Snapshot>>,
    in_flight: Option<InFlight>,
}

impl SessionState {
    fn view(&self) -> ViewState {
        match self.availability {
            Availability::Unchecked | Availability::Checking => ViewState::Unchecked,
            Availability::Unavailable => ViewState::Unreachable,
            Availability::Available => match self.phase {
                LoadPhase::Idle => ViewState::Idle,
                LoadPhase::Loading => ViewState::Loading,
                LoadPhase::LoadFailed => ViewState::Failed {
                    message: self
                        .error
                        .clone()
                        .unwrap_or_else(|| LOAD_FAILED_MESSAGE.to_string()),
                },
                LoadPhase::Loaded => ViewState::Loaded {
                    group_count: self
                        .snapshot
                        .as_ref()
                        .map(|snapshot| snapshot.groups.len())
                        .unwrap_or_default(),
                },
            },
        }
    }
}

struct SessionShared {
    aggregator: HierarchyAggregator,
    machine: LoadStateMachine,
    sequence: AtomicU64,
    state: Mutex<SessionState>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 采用聚合结果，过期序号的结果被丢弃
    fn complete(&self, sequence: u64, outcome: Result<Vec<GroupedPatientStudy>>) {
        let mut state = self.lock();
        match &state.in_flight {
            Some(in_flight) if in_flight.sequence == sequence => {}
            _ => {
                debug!("Discarding superseded aggregation result #{}", sequence);
                return;
            }
        }

        let event = if outcome.is_ok() {
            LoadEvent::Succeeded
        } else {
            LoadEvent::Failed
        };
        let phase = match self.machine.transition(state.phase, event) {
            Ok(phase) => phase,
            Err(e) => {
                warn!("Ignoring aggregation result #{}: {}", sequence, e);
                return;
            }
        };

        state.in_flight = None;
        state.phase = phase;
        match outcome {
            Ok(groups) => {
                info!(
                    "Aggregation #{} loaded {} patient groups",
                    sequence,
                    groups.len()
                );
                state.error = None;
                state.snapshot = Some(Arc::new(Snapshot {
                    sequence,
                    loaded_at: Utc::now(),
                    groups,
                }));
            }
            Err(e) => {
                error!("Error loading studies (aggregation #{}): {}", sequence, e);
                state.error = Some(LOAD_FAILED_MESSAGE.to_string());
            }
        }
    }
}

/// 归档会话
///
/// 克隆后共享同一会话状态。
#[derive(Clone)]
pub struct ArchiveSession {
    shared: Arc<SessionShared>,
}

impl ArchiveSession {
    /// 创建会话，可用性处于未检查状态
    ///
    /// 不探测归档。调用 `check_availability` 之前 `refresh` 不发起任何请求，
    /// 需要加载检查列表时使用 `connect`。
    pub fn new(client: ArchiveClient, max_concurrency: usize) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                aggregator: HierarchyAggregator::new(client, max_concurrency),
                machine: LoadStateMachine::new(),
                sequence: AtomicU64::new(0),
                state: Mutex::new(SessionState {
                    availability: Availability::Unchecked,
                    phase: LoadPhase::Idle,
                    error: None,
                    snapshot: None,
                    in_flight: None,
                }),
            }),
        }
    }

    /// 创建会话并立即检查归档可用性
    pub async fn connect(client: ArchiveClient, max_concurrency: usize) -> Self {
        let session = Self::new(client, max_concurrency);
        session.check_availability().await;
        session
    }

    pub async fn from_config(config: &ArchiveConfig) -> Result<Self> {
        let client = ArchiveClient::from_config(config)?;
        Ok(Self::connect(client, config.max_concurrency).await)
    }

    fn client(&self) -> &ArchiveClient {
        self.shared.aggregator.client()
    }

    /// 重新探测归档，结果在下次检查前保持不变
    pub async fn check_availability(&self) -> bool {
        self.shared.lock().availability = Availability::Checking;

        let available = self.client().probe_liveness().await;

        self.shared.lock().availability = if available {
            Availability::Available
        } else {
            Availability::Unavailable
        };
        info!(
            "Archive {} is {}",
            self.client().locator().base_url(),
            if available { "available" } else { "unavailable" }
        );
        available
    }

    /// 刷新检查列表
    ///
    /// 归档不可用时直接返回；已有聚合进行中时等待该聚合而不重复请求。
    pub async fn refresh(&self) -> ViewState {
        let pass = {
            let mut state = self.shared.lock();
            if state.availability != Availability::Available {
                debug!("Archive unavailable, refresh skipped");
                return state.view();
            }
            let joined = state
                .in_flight
                .as_ref()
                .map(|in_flight| (in_flight.sequence, in_flight.done.clone()));
            match joined {
                Some((sequence, done)) => {
                    debug!("Joining in-flight aggregation #{}", sequence);
                    (sequence, done)
                }
                None => match self.start_pass(&mut state) {
                    Some(pass) => pass,
                    None => return state.view(),
                },
            }
        };

        self.settle(pass).await
    }

    /// 强制开始新的聚合，进行中的聚合结果将被丢弃
    pub async fn reload(&self) -> ViewState {
        let pass = {
            let mut state = self.shared.lock();
            if state.availability != Availability::Available {
                debug!("Archive unavailable, reload skipped");
                return state.view();
            }
            match self.start_pass(&mut state) {
                Some(pass) => pass,
                None => return state.view(),
            }
        };

        self.settle(pass).await
    }

    /// 等待聚合结束；若被更新的聚合取代，则继续等待最新的聚合
    async fn settle(&self, pass: (u64, Shared<BoxFuture<'static, ()>>)) -> ViewState {
        let (mut sequence, mut done) = pass;
        loop {
            done.await;
            let next = self
                .shared
                .lock()
                .in_flight
                .as_ref()
                .map(|in_flight| (in_flight.sequence, in_flight.done.clone()));
            match next {
                Some((next_sequence, next_done)) if next_sequence > sequence => {
                    sequence = next_sequence;
                    done = next_done;
                }
                _ => return self.view_state(),
            }
        }
    }

    fn start_pass(
        &self,
        state: &mut SessionState,
    ) -> Option<(u64, Shared<BoxFuture<'static, ()>>)> {
        let phase = match self.shared.machine.transition(state.phase, LoadEvent::Started) {
            Ok(phase) => phase,
            Err(e) => {
                warn!("Cannot start aggregation: {}", e);
                return None;
            }
        };
        let sequence = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = &state.in_flight {
            info!(
                "Aggregation #{} supersedes in-flight #{}",
                sequence, previous.sequence
            );
        }

        state.phase = phase;
        state.error = None;

        // 聚合在独立任务中运行，调用方放弃等待时结果仍会写回会话
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let outcome = shared.aggregator.aggregate().await;
            shared.complete(sequence, outcome);
        });

        let shared = Arc::clone(&self.shared);
        let done = async move {
            if let Err(e) = handle.await {
                shared.complete(
                    sequence,
                    Err(PacsError::Internal(format!("aggregation task aborted: {}", e))),
                );
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            sequence,
            done: done.clone(),
        });
        debug!("Started aggregation #{}", sequence);
        Some((sequence, done))
    }

    pub fn availability(&self) -> Availability {
        self.shared.lock().availability
    }

    pub fn load_phase(&self) -> LoadPhase {
        self.shared.lock().phase
    }

    pub fn view_state(&self) -> ViewState {
        self.shared.lock().view()
    }

    /// 最近一次加载失败的用户提示
    pub fn error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    /// 最近一次成功聚合的结果，加载失败时保持不变
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.lock().snapshot.clone()
    }

    pub fn file_url(&self, instance_id: &str) -> String {
        self.client().locator().file_url(instance_id)
    }

    pub fn preview_url(&self, instance_id: &str) -> String {
        self.client().locator().preview_url(instance_id)
    }

    pub fn wado_url(&self, study_uid: &str, series_uid: &str, instance_uid: &str) -> String {
        self.client()
            .locator()
            .wado_url(study_uid, series_uid, instance_uid)
    }

    pub async fn list_series(&self, study_id: &str) -> Result<Vec<Series>> {
        self.shared.aggregator.list_series(study_id).await
    }

    pub async fn list_instances(&self, series_id: &str) -> Result<Vec<Instance>> {
        self.shared.aggregator.list_instances(series_id).await
    }

    pub async fn upload_binary(&self, payload: Vec<u8>) -> Result<String> {
        self.client().upload_binary(payload).await
    }

    pub async fn system_info(&self) -> Result<SystemInfo> {
        self.client().system_info().await
    }
}

impl std::fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ArchiveSession")
            .field("availability", &state.availability)
            .field("phase", &state.phase)
            .field("in_flight", &state.in_flight.as_ref().map(|f| f.sequence))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_archive::testing::ScriptedTransport;
    use pacs_archive::Locator;
    use serde_json::json;
    use std::time::Duration;

    fn archive() -> ScriptedTransport {
        ScriptedTransport::new()
            .with_json("/system", json!({"Name": "ORTHANC", "Version": "1.12.1"}))
            .with_json("/patients", json!(["p-1", "p-2"]))
            .with_json("/patients/p-1", json!({"ID": "p-1", "MainDicomTags": {"PatientID": "PAT1"}}))
            .with_json("/patients/p-2", json!({"ID": "p-2", "MainDicomTags": {"PatientID": "PAT2"}}))
            .with_json("/patients/p-1/studies", json!([{"ID": "s-1"}]))
            .with_json("/patients/p-2/studies", json!([]))
            .with_json("/studies/s-1", json!({"ID": "s-1", "ParentPatient": "p-1"}))
    }

    fn client(transport: &Arc<ScriptedTransport>) -> ArchiveClient {
        ArchiveClient::new(transport.clone(), Locator::new("http://archive:8042"))
    }

    #[tokio::test]
    async fn test_new_session_is_unchecked() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::new(client(&transport), 4);

        assert_eq!(session.availability(), Availability::Unchecked);
        assert_eq!(session.view_state(), ViewState::Unchecked);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_loads_groups() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::connect(client(&transport), 4).await;
        assert_eq!(session.view_state(), ViewState::Idle);

        let view = session.refresh().await;

        assert_eq!(view, ViewState::Loaded { group_count: 2 });
        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.groups[0].patient_id, "PAT1");
        assert_eq!(snapshot.groups[0].studies.len(), 1);
        assert!(snapshot.groups[1].studies.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_archive_skips_refresh() {
        let transport = Arc::new(archive().with_failure("/system", "connection refused"));
        let session = ArchiveSession::connect(client(&transport), 4).await;
        assert_eq!(session.availability(), Availability::Unavailable);

        let view = session.refresh().await;

        assert_eq!(view, ViewState::Unreachable);
        assert_eq!(transport.requests(), vec!["GET /system"]);
        assert_eq!(session.load_phase(), LoadPhase::Idle);
    }

    #[tokio::test]
    async fn test_rapid_refreshes_share_one_pass() {
        let transport = Arc::new(archive().with_delay(Duration::from_millis(20)));
        let session = ArchiveSession::connect(client(&transport), 4).await;

        let (first, second) = tokio::join!(session.refresh(), session.refresh());

        assert_eq!(first, ViewState::Loaded { group_count: 2 });
        assert_eq!(second, first);
        assert_eq!(transport.get_count("/patients"), 1);
        assert_eq!(transport.get_count("/studies/s-1"), 1);
        assert_eq!(session.snapshot().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_refresh_while_loading_reports_loading() {
        let transport = Arc::new(archive().with_delay(Duration::from_millis(50)));
        let session = ArchiveSession::connect(client(&transport), 4).await;

        let background = session.clone();
        let handle = tokio::spawn(async move { background.refresh().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.view_state(), ViewState::Loading);

        assert_eq!(handle.await.unwrap(), ViewState::Loaded { group_count: 2 });
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::connect(client(&transport), 4).await;
        session.refresh().await;
        let before = session.snapshot().unwrap();

        transport.script_failure("/patients/p-2/studies", "HTTP 503");
        let view = session.refresh().await;

        assert_eq!(
            view,
            ViewState::Failed {
                message: LOAD_FAILED_MESSAGE.to_string()
            }
        );
        assert_eq!(session.load_phase(), LoadPhase::LoadFailed);
        let after = session.snapshot().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.groups.len(), 2);

        transport.script_json("/patients/p-2/studies", json!([]));
        assert_eq!(session.refresh().await, ViewState::Loaded { group_count: 2 });
        assert!(session.error().is_none());
        assert_eq!(session.snapshot().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_reload_discards_superseded_result() {
        let transport = Arc::new(archive().with_delay(Duration::from_millis(20)));
        let session = ArchiveSession::connect(client(&transport), 4).await;

        let (first, second) = tokio::join!(session.refresh(), session.reload());

        assert_eq!(first, ViewState::Loaded { group_count: 2 });
        assert_eq!(second, ViewState::Loaded { group_count: 2 });
        assert_eq!(transport.get_count("/patients"), 2);
        assert_eq!(session.snapshot().unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_stale_result_does_not_overwrite_newer_load() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::connect(client(&transport), 4).await;
        session.refresh().await;

        session.shared.complete(1, Ok(Vec::new()));
        session.shared.complete(7, Err(PacsError::Transport("late".to_string())));

        assert_eq!(session.view_state(), ViewState::Loaded { group_count: 2 });
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_unchecked_session_needs_probe_before_refresh() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::new(client(&transport), 4);

        assert_eq!(session.refresh().await, ViewState::Unchecked);
        assert!(transport.requests().is_empty());

        assert!(session.check_availability().await);
        assert_eq!(session.refresh().await, ViewState::Loaded { group_count: 2 });
    }

    #[tokio::test]
    async fn test_recheck_recovers_availability() {
        let transport = Arc::new(archive().with_failure("/system", "connection refused"));
        let session = ArchiveSession::connect(client(&transport), 4).await;
        assert_eq!(session.view_state(), ViewState::Unreachable);

        transport.script_json("/system", json!({"Name": "ORTHANC"}));
        assert!(session.check_availability().await);
        assert_eq!(session.refresh().await, ViewState::Loaded { group_count: 2 });
    }

    #[tokio::test]
    async fn test_locator_facade() {
        let transport = Arc::new(archive());
        let session = ArchiveSession::new(client(&transport), 4);

        assert_eq!(session.file_url("abc"), "http://archive:8042/instances/abc/file");
        assert_eq!(session.preview_url("abc"), "http://archive:8042/instances/abc/preview");
        assert!(session
            .wado_url("1.2.3", "4.5.6", "7.8.9")
            .ends_with("/wado?requestType=WADO&studyUID=1.2.3&seriesUID=4.5.6&objectUID=7.8.9&contentType=application/dicom"));
        assert!(transport.requests().is_empty());
    }
}
