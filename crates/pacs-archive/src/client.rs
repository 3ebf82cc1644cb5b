//! 归档客户端
//!
//! 每种资源类型对应一组操作：标识列表、记录获取、存活探测和实例上传。
//! 本层不重试也不缓存，每次调用都访问归档。

use pacs_core::{Instance, PacsError, Patient, Result, Series, Study, SystemInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::locator::Locator;
use crate::transport::{ArchiveTransport, HttpTransport};

const SYSTEM_PATH: &str = "/system";
const UPLOAD_PATH: &str = "/instances";
const UPLOAD_FIELD: &str = "file";
const UPLOAD_FILE_NAME: &str = "upload.dcm";

/// 归档资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Patient,
    Study,
    Series,
    Instance,
}

impl ResourceKind {
    /// 资源集合路径段
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Patient => "patients",
            Self::Study => "studies",
            Self::Series => "series",
            Self::Instance => "instances",
        }
    }

    /// 层级中的上级资源类型
    pub fn parent(&self) -> Option<ResourceKind> {
        match self {
            Self::Patient => None,
            Self::Study => Some(Self::Patient),
            Self::Series => Some(Self::Study),
            Self::Instance => Some(Self::Series),
        }
    }
}

/// 可从归档获取的记录
pub trait ArchiveRecord: DeserializeOwned + Send {
    const KIND: ResourceKind;
}

impl ArchiveRecord for Patient {
    const KIND: ResourceKind = ResourceKind::Patient;
}

impl ArchiveRecord for Study {
    const KIND: ResourceKind = ResourceKind::Study;
}

impl ArchiveRecord for Series {
    const KIND: ResourceKind = ResourceKind::Series;
}

impl ArchiveRecord for Instance {
    const KIND: ResourceKind = ResourceKind::Instance;
}

/// 列表响应项：子资源列表返回展开的对象，顶层列表返回标识
#[derive(Deserialize)]
#[serde(untagged)]
enum ListedResource {
    Id(String),
    Expanded {
        #[serde(rename = "ID")]
        id: String,
    },
}

impl ListedResource {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Expanded { id } => id,
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// 归档客户端
#[derive(Clone)]
pub struct ArchiveClient {
    transport: Arc<dyn ArchiveTransport>,
    locator: Locator,
    probe_timeout: Duration,
}

impl ArchiveClient {
    pub fn new(transport: Arc<dyn ArchiveTransport>, locator: Locator) -> Self {
        Self {
            transport,
            locator,
            probe_timeout: ArchiveConfig::default().probe_timeout(),
        }
    }

    /// 按配置创建使用HTTP传输层的客户端
    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), Locator::new(&config.base_url))
            .with_probe_timeout(config.probe_timeout()))
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// 列出资源标识
    ///
    /// 指定 `parent_id` 时列出该上级资源下的子资源。
    pub async fn list_identifiers(
        &self,
        kind: ResourceKind,
        parent_id: Option<&str>,
    ) -> Result<Vec<String>> {
        let path = match (parent_id, kind.parent()) {
            (None, _) => format!("/{}", kind.collection()),
            (Some(parent_id), Some(parent)) => {
                format!("/{}/{}/{}", parent.collection(), parent_id, kind.collection())
            }
            (Some(_), None) => {
                return Err(PacsError::InvalidRequest(format!(
                    "{} has no parent resource",
                    kind.collection()
                )))
            }
        };

        let body = self.transport.get(&path).await?;
        let listed: Vec<ListedResource> = serde_json::from_slice(&body)?;
        debug!("Listed {} identifiers from {}", listed.len(), path);
        Ok(listed.into_iter().map(ListedResource::into_id).collect())
    }

    /// 获取单条记录
    pub async fn fetch_record<R: ArchiveRecord>(&self, id: &str) -> Result<R> {
        let path = format!("/{}/{}", R::KIND.collection(), id);
        let body = self.transport.get(&path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// 获取归档系统信息
    pub async fn system_info(&self) -> Result<SystemInfo> {
        let body = self.transport.get(SYSTEM_PATH).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// 探测归档是否可达，任何失败都返回 `false`
    pub async fn probe_liveness(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.transport.get(SYSTEM_PATH)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!("Archive is not available at {}: {}", self.locator.base_url(), e);
                false
            }
            Err(_) => {
                warn!(
                    "Archive liveness probe timed out after {:?}: {}",
                    self.probe_timeout,
                    self.locator.base_url()
                );
                false
            }
        }
    }

    /// 上传DICOM二进制内容，返回归档分配的实例标识
    pub async fn upload_binary(&self, payload: Vec<u8>) -> Result<String> {
        let size = payload.len();
        let body = self
            .transport
            .post_multipart(UPLOAD_PATH, UPLOAD_FIELD, UPLOAD_FILE_NAME, payload)
            .await?;

        let response: UploadResponse = serde_json::from_slice(&body)
            .map_err(|e| PacsError::Upload(format!("Unexpected upload response: {}", e)))?;
        info!("Uploaded {} bytes as instance {}", size, response.id);
        Ok(response.id)
    }
}

impl std::fmt::Debug for ArchiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveClient")
            .field("base_url", &self.locator.base_url())
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}
