//! 层级聚合
//!
//! 沿 患者 → 检查 → 序列 → 实例 逐层先列出标识再并发获取记录。每层在全部请求
//! 完成后才继续，结果保持标识列表的顺序；任何一次请求失败都会中止整个调用。

use futures::stream::{self, StreamExt, TryStreamExt};
use pacs_archive::{ArchiveClient, ArchiveRecord, ResourceKind};
use pacs_core::{
    GroupedPatientStudy, Instance, PacsError, Patient, Result, Series, Study, StudySummary,
};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 层级聚合器
#[derive(Debug, Clone)]
pub struct HierarchyAggregator {
    client: ArchiveClient,
    /// 每层同时进行的请求上限
    max_concurrency: usize,
}

impl HierarchyAggregator {
    pub fn new(client: ArchiveClient, max_concurrency: usize) -> Self {
        Self {
            client,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn client(&self) -> &ArchiveClient {
        &self.client
    }

    /// 生成按患者分组的检查列表
    pub async fn aggregate(&self) -> Result<Vec<GroupedPatientStudy>> {
        let patients = self.list_patients().await?;
        let known: HashSet<String> = patients.iter().map(|patient| patient.id.clone()).collect();
        let known = &known;

        let groups: Vec<GroupedPatientStudy> = stream::iter(patients)
            .map(|patient| async move {
                let studies = self.list_studies(&patient.id).await?;
                Ok::<_, PacsError>(group_studies(&patient, studies, known))
            })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        let study_count: usize = groups.iter().map(|group| group.studies.len()).sum();
        info!(
            "Aggregated {} studies for {} patients",
            study_count,
            groups.len()
        );
        Ok(groups)
    }

    /// 获取所有患者，重复的标识只保留第一次出现
    pub async fn list_patients(&self) -> Result<Vec<Patient>> {
        let ids = self
            .client
            .list_identifiers(ResourceKind::Patient, None)
            .await?;
        self.fetch_all(dedup_preserving_order(ids)).await
    }

    pub async fn list_studies(&self, patient_id: &str) -> Result<Vec<Study>> {
        let ids = self
            .client
            .list_identifiers(ResourceKind::Study, Some(patient_id))
            .await?;
        self.fetch_all(ids).await
    }

    pub async fn list_series(&self, study_id: &str) -> Result<Vec<Series>> {
        let ids = self
            .client
            .list_identifiers(ResourceKind::Series, Some(study_id))
            .await?;
        self.fetch_all(ids).await
    }

    pub async fn list_instances(&self, series_id: &str) -> Result<Vec<Instance>> {
        let ids = self
            .client
            .list_identifiers(ResourceKind::Instance, Some(series_id))
            .await?;
        self.fetch_all(ids).await
    }

    async fn fetch_all<R: ArchiveRecord>(&self, ids: Vec<String>) -> Result<Vec<R>> {
        debug!(
            "Fetching {} {} records",
            ids.len(),
            R::KIND.collection()
        );
        let client = &self.client;
        stream::iter(ids)
            .map(|id| async move { client.fetch_record::<R>(&id).await })
            .buffered(self.max_concurrency)
            .try_collect()
            .await
    }
}

/// 将检查归入列出它的患者分组
///
/// 上级患者不在本次聚合已知患者中的检查被丢弃；上级是其他已知患者的检查
/// 仍保留在列出它的患者下。
fn group_studies(
    patient: &Patient,
    studies: Vec<Study>,
    known: &HashSet<String>,
) -> GroupedPatientStudy {
    let summaries = studies
        .iter()
        .filter(|study| {
            let parent = study.parent_patient.as_str();
            if parent.is_empty() || parent == patient.id {
                return true;
            }
            if known.contains(parent) {
                debug!(
                    "Study {} listed under {} belongs to known patient {}",
                    study.id, patient.id, parent
                );
                return true;
            }
            warn!(
                "Dropping study {}: parent patient {} is unknown to this pass",
                study.id, parent
            );
            false
        })
        .map(StudySummary::from_archive)
        .collect();

    GroupedPatientStudy::new(patient, summaries)
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_archive::testing::ScriptedTransport;
    use pacs_archive::Locator;
    use pacs_core::{MediaSource, MediaType, PLACEHOLDER_MODALITY};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// 两名患者：p-2 有两个检查，p-1 有一个
    fn archive() -> ScriptedTransport {
        ScriptedTransport::new()
            .with_json("/patients", json!(["p-2", "p-1"]))
            .with_json(
                "/patients/p-1",
                json!({"ID": "p-1", "MainDicomTags": {"PatientID": "PAT1", "PatientName": "Doe^Jane"}}),
            )
            .with_json(
                "/patients/p-2",
                json!({"ID": "p-2", "MainDicomTags": {"PatientID": "PAT2", "PatientName": "Roe^Rick"}}),
            )
            .with_json("/patients/p-1/studies", json!([{"ID": "s-10"}]))
            .with_json("/patients/p-2/studies", json!([{"ID": "s-22"}, {"ID": "s-21"}]))
            .with_json(
                "/studies/s-10",
                json!({"ID": "s-10", "ParentPatient": "p-1", "MainDicomTags": {"StudyDate": "20240101", "StudyDescription": "CT CHEST", "AccessionNumber": "A10"}}),
            )
            .with_json(
                "/studies/s-21",
                json!({"ID": "s-21", "ParentPatient": "p-2", "MainDicomTags": {"StudyDate": "20230601", "AccessionNumber": "A21"}}),
            )
            .with_json(
                "/studies/s-22",
                json!({"ID": "s-22", "ParentPatient": "p-2", "MainDicomTags": {"StudyDate": "20230702", "StudyDescription": "MR BRAIN", "AccessionNumber": "A22"}}),
            )
    }

    fn aggregator(transport: &Arc<ScriptedTransport>) -> HierarchyAggregator {
        let client = ArchiveClient::new(transport.clone(), Locator::new("http://archive"));
        HierarchyAggregator::new(client, 4)
    }

    #[tokio::test]
    async fn test_aggregate_groups_in_archive_order() {
        let transport = Arc::new(archive());

        let groups = aggregator(&transport).aggregate().await.unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].patient_id, "PAT2");
        assert_eq!(groups[1].patient_id, "PAT1");

        let study_ids: Vec<&str> = groups[0].studies.iter().map(|s| s.study_id.as_str()).collect();
        assert_eq!(study_ids, vec!["s-22", "s-21"]);
        assert_eq!(groups[0].studies[1].description, "No description");
        assert_eq!(groups[1].studies[0].description, "CT CHEST");
    }

    #[tokio::test]
    async fn test_aggregate_tags_every_study() {
        let transport = Arc::new(archive());

        let groups = aggregator(&transport).aggregate().await.unwrap();

        for summary in groups.iter().flat_map(|group| group.studies.iter()) {
            assert_eq!(summary.modality, PLACEHOLDER_MODALITY);
            assert_eq!(summary.media_type(), MediaType::Dicom);
            assert_eq!(summary.source(), MediaSource::Orthanc);
            assert_eq!(summary.image_url, format!("orthanc:{}", summary.study_id));
        }
    }

    #[tokio::test]
    async fn test_order_survives_uneven_latency() {
        // p-2 的详情最慢返回，结果顺序仍然跟随列表顺序
        let transport = Arc::new(
            archive()
                .with_path_delay("/patients/p-2", Duration::from_millis(40))
                .with_path_delay("/studies/s-22", Duration::from_millis(30)),
        );

        let groups = aggregator(&transport).aggregate().await.unwrap();
        assert_eq!(groups[0].patient_id, "PAT2");
        assert_eq!(groups[0].studies[0].study_id, "s-22");
    }

    #[tokio::test]
    async fn test_duplicate_patient_ids_collapse() {
        let transport = Arc::new(archive().with_json("/patients", json!(["p-1", "p-2", "p-1"])));

        let groups = aggregator(&transport).aggregate().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(transport.get_count("/patients/p-1"), 1);
    }

    #[tokio::test]
    async fn test_empty_archive() {
        let transport = Arc::new(ScriptedTransport::new().with_json("/patients", json!([])));

        let groups = aggregator(&transport).aggregate().await.unwrap();
        assert!(groups.is_empty());
        assert_eq!(transport.requests(), vec!["GET /patients"]);
    }

    #[tokio::test]
    async fn test_study_listing_failure_aborts_pass() {
        let transport = Arc::new(archive().with_failure("/patients/p-1/studies", "HTTP 503"));

        let result = aggregator(&transport).aggregate().await;
        assert!(matches!(result, Err(PacsError::Transport(_))));
    }

    #[tokio::test]
    async fn test_missing_study_is_not_found() {
        let transport = Arc::new(archive().with_json("/patients/p-1/studies", json!(["s-10", "s-missing"])));

        let result = aggregator(&transport).aggregate().await;
        assert!(matches!(result, Err(PacsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cross_listed_study_with_known_parent_is_kept() {
        // p-1 的检查列表返回了上级为 p-2 的检查
        let transport = Arc::new(
            archive()
                .with_json("/patients/p-1/studies", json!([{"ID": "s-21"}]))
                .with_json("/patients/p-2/studies", json!([])),
        );

        let groups = aggregator(&transport).aggregate().await.unwrap();
        assert_eq!(groups[0].patient_id, "PAT2");
        assert!(groups[0].studies.is_empty());
        assert_eq!(groups[1].patient_id, "PAT1");
        let study_ids: Vec<&str> = groups[1].studies.iter().map(|s| s.study_id.as_str()).collect();
        assert_eq!(study_ids, vec!["s-21"]);
    }

    #[tokio::test]
    async fn test_study_with_unknown_parent_is_dropped() {
        let transport = Arc::new(archive().with_json(
            "/studies/s-21",
            json!({"ID": "s-21", "ParentPatient": "p-9"}),
        ));

        let groups = aggregator(&transport).aggregate().await.unwrap();
        let study_ids: Vec<&str> = groups[0].studies.iter().map(|s| s.study_id.as_str()).collect();
        assert_eq!(study_ids, vec!["s-22"]);
    }

    #[tokio::test]
    async fn test_list_series_and_instances() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .with_json("/studies/s-1/series", json!([{"ID": "se-2"}, {"ID": "se-1"}]))
                .with_json("/series/se-1", json!({"ID": "se-1", "ParentStudy": "s-1", "MainDicomTags": {"Modality": "CT", "SeriesNumber": "1"}}))
                .with_json("/series/se-2", json!({"ID": "se-2", "ParentStudy": "s-1", "MainDicomTags": {"Modality": "MR", "SeriesNumber": "2"}}))
                .with_json("/series/se-1/instances", json!([{"ID": "i-1"}, {"ID": "i-2"}]))
                .with_json("/instances/i-1", json!({"ID": "i-1", "IndexInSeries": 1, "MainDicomTags": {"SOPInstanceUID": "1.2.1"}}))
                .with_json("/instances/i-2", json!({"ID": "i-2", "IndexInSeries": 2, "MainDicomTags": {"SOPInstanceUID": "1.2.2"}})),
        );
        let aggregator = aggregator(&transport);

        let series = aggregator.list_series("s-1").await.unwrap();
        let modalities: Vec<&str> = series.iter().map(|s| s.main_dicom_tags.modality.as_str()).collect();
        assert_eq!(modalities, vec!["MR", "CT"]);
        assert_eq!(series[1].series_number(), Some(1));

        let instances = aggregator.list_instances("se-1").await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].main_dicom_tags.sop_instance_uid, "1.2.2");
    }

    #[test]
    fn test_dedup_preserving_order() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup_preserving_order(ids), vec!["b", "a"]);
    }
}
