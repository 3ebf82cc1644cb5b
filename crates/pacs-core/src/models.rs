//! 核心数据模型定义
//!
//! 归档记录按归档REST接口的JSON结构建模（PascalCase字段，主要DICOM标签位于
//! `MainDicomTags` 下），界面视图模型按camelCase序列化。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::{parse_dicom_date, study_reference};

/// 检查在展开序列之前使用的占位设备类型
pub const PLACEHOLDER_MODALITY: &str = "DICOM";

/// 检查描述为空时的显示文本
pub const NO_DESCRIPTION: &str = "No description";

/// 性别枚举
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Other,
}

/// 患者主要DICOM标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PatientTags {
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    pub patient_name: String,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
}

/// 患者记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Patient {
    /// 归档内部标识
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub main_dicom_tags: PatientTags,
    #[serde(default)]
    pub studies: Vec<String>,
}

impl Patient {
    /// 出生日期，仅当标签为合法的DA值时返回
    pub fn birth_date(&self) -> Option<NaiveDate> {
        self.main_dicom_tags
            .patient_birth_date
            .as_deref()
            .and_then(parse_dicom_date)
    }

    pub fn sex(&self) -> Option<Sex> {
        match self.main_dicom_tags.patient_sex.as_deref().map(str::trim) {
            Some("M") => Some(Sex::Male),
            Some("F") => Some(Sex::Female),
            Some("O") => Some(Sex::Other),
            _ => None,
        }
    }
}

/// 检查主要DICOM标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StudyTags {
    pub study_date: String,
    pub study_description: String,
    pub accession_number: String,
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    pub number_of_study_related_series: Option<String>,
}

/// 检查记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Study {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub parent_patient: String,
    #[serde(default)]
    pub main_dicom_tags: StudyTags,
    #[serde(default)]
    pub series: Vec<String>,
}

impl Study {
    pub fn study_date(&self) -> Option<NaiveDate> {
        parse_dicom_date(&self.main_dicom_tags.study_date)
    }

    /// 序列数量：优先使用标签值，否则使用子资源列表长度
    pub fn series_count(&self) -> usize {
        self.main_dicom_tags
            .number_of_study_related_series
            .as_deref()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(self.series.len())
    }
}

/// 序列主要DICOM标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SeriesTags {
    pub modality: String,
    pub series_number: String,
    pub series_description: String,
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    pub number_of_series_related_instances: Option<String>,
}

/// 序列记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Series {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub parent_study: String,
    #[serde(default)]
    pub main_dicom_tags: SeriesTags,
    #[serde(default)]
    pub instances: Vec<String>,
}

impl Series {
    pub fn instance_count(&self) -> usize {
        self.main_dicom_tags
            .number_of_series_related_instances
            .as_deref()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(self.instances.len())
    }

    pub fn series_number(&self) -> Option<i32> {
        self.main_dicom_tags.series_number.trim().parse().ok()
    }
}

/// 实例主要DICOM标签
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceTags {
    #[serde(rename = "SOPInstanceUID")]
    pub sop_instance_uid: String,
    pub instance_number: String,
}

/// 影像实例记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub parent_series: String,
    #[serde(default)]
    pub file_size: u64,
    /// 归档存储句柄，对本层不透明
    #[serde(default)]
    pub file_uuid: String,
    #[serde(default)]
    pub index_in_series: Option<u32>,
    #[serde(default)]
    pub main_dicom_tags: InstanceTags,
}

/// 归档系统信息 (`GET /system`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    pub api_version: Option<u32>,
    pub dicom_aet: String,
    pub dicom_port: Option<u16>,
}

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "dicom")]
    Dicom,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "3d")]
    ThreeD,
}

/// 媒体来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Orthanc,
    Local,
}

/// 界面使用的检查摘要
///
/// `media_type` 与 `source` 在构造时确定，之后不可修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySummary {
    pub study_id: String,
    pub study_date: String,
    pub modality: String,
    pub description: String,
    pub accession_number: String,
    pub image_url: String,
    media_type: MediaType,
    source: MediaSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orthanc_id: Option<String>,
}

impl StudySummary {
    /// 由归档检查记录生成摘要
    ///
    /// 设备类型在此阶段固定为占位值，真实值需要序列级查询。
    pub fn from_archive(study: &Study) -> Self {
        let tags = &study.main_dicom_tags;
        let description = if tags.study_description.trim().is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            tags.study_description.clone()
        };

        Self {
            study_id: study.id.clone(),
            study_date: tags.study_date.clone(),
            modality: PLACEHOLDER_MODALITY.to_string(),
            description,
            accession_number: tags.accession_number.clone(),
            image_url: study_reference(&study.id),
            media_type: MediaType::Dicom,
            source: MediaSource::Orthanc,
            orthanc_id: Some(study.id.clone()),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn source(&self) -> MediaSource {
        self.source
    }
}

/// 按患者分组的检查列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedPatientStudy {
    pub patient_id: String,
    pub patient_name: String,
    pub studies: Vec<StudySummary>,
}

impl GroupedPatientStudy {
    pub fn new(patient: &Patient, studies: Vec<StudySummary>) -> Self {
        Self {
            patient_id: patient.main_dicom_tags.patient_id.clone(),
            patient_name: patient.main_dicom_tags.patient_name.clone(),
            studies,
        }
    }
}
