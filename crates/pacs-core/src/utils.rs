//! 通用工具函数

use chrono::NaiveDate;

/// 归档检查引用的URI方案
pub const ARCHIVE_REFERENCE_SCHEME: &str = "orthanc";

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_numeric() || c == '.')
}

/// 解析DICOM DA格式 (YYYYMMDD) 的日期
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

/// 生成指向归档检查的引用，由界面延迟解析
pub fn study_reference(study_id: &str) -> String {
    format!("{}:{}", ARCHIVE_REFERENCE_SCHEME, study_id)
}

/// 规范化归档基础地址：去除空白和末尾的 `/`
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
