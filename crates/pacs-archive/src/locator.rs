//! 检索地址生成
//!
//! 纯函数，不发起网络请求，也不校验标识是否存在于归档中。

use pacs_core::utils::normalize_base_url;

/// 检索地址生成器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    base_url: String,
}

impl Locator {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 实例原始DICOM文件地址
    pub fn file_url(&self, instance_id: &str) -> String {
        format!("{}/instances/{}/file", self.base_url, instance_id)
    }

    /// 实例渲染预览地址
    pub fn preview_url(&self, instance_id: &str) -> String {
        format!("{}/instances/{}/preview", self.base_url, instance_id)
    }

    /// WADO-URI地址
    ///
    /// 参数顺序固定，归档侧缓存可能以完整URL作为键。
    pub fn wado_url(&self, study_uid: &str, series_uid: &str, instance_uid: &str) -> String {
        format!(
            "{}/wado?requestType=WADO&studyUID={}&seriesUID={}&objectUID={}&contentType=application/dicom",
            self.base_url, study_uid, series_uid, instance_uid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wado_url_parameter_order() {
        let locator = Locator::new("http://localhost:8042");
        let url = locator.wado_url("1.2.3", "4.5.6", "7.8.9");

        assert_eq!(
            url,
            "http://localhost:8042/wado?requestType=WADO&studyUID=1.2.3&seriesUID=4.5.6&objectUID=7.8.9&contentType=application/dicom"
        );

        let positions: Vec<usize> = [
            "requestType=WADO",
            "studyUID=1.2.3",
            "seriesUID=4.5.6",
            "objectUID=7.8.9",
            "contentType=application/dicom",
        ]
        .iter()
        .map(|param| url.find(param).unwrap())
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_file_and_preview_differ_only_in_last_segment() {
        let locator = Locator::new("http://localhost:8042/");
        let file = locator.file_url("abc");
        let preview = locator.preview_url("abc");

        assert_eq!(file, "http://localhost:8042/instances/abc/file");
        assert_eq!(preview, "http://localhost:8042/instances/abc/preview");
        assert_eq!(file.rsplit_once('/').unwrap().0, preview.rsplit_once('/').unwrap().0);
    }

    #[test]
    fn test_locator_does_not_validate_identifiers() {
        let locator = Locator::new("http://localhost:8042");
        assert_eq!(locator.file_url(""), "http://localhost:8042/instances//file");
    }
}
