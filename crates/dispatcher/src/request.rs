use serde::{Deserialize, Serialize};

use mediaflow_core::{MediaflowError, MediaflowResult, RemoteClusterConfig};
use mediaflow_domain::workflow::WorkflowManifest;

const ARCHIVE_EXTENSIONS: [&str; 4] = [".tar", ".tar.gz", ".tgz", ".zip"];

/// 工作流形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestShape {
    SingleFile,
    Archive,
}

impl IngestShape {
    /// 按文件名后缀区分归档与单文件
    pub fn detect(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if ARCHIVE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            IngestShape::Archive
        } else {
            IngestShape::SingleFile
        }
    }
}

/// 一次上传导入请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub project: i64,
    /// 媒体类型；归档导入时由解包结果逐项决定，必须为空
    pub entity_type: Option<i64>,
    pub token: String,
    pub url: String,
    pub name: String,
    pub section: String,
    pub md5: String,
    pub gid: String,
    pub uid: String,
    pub user: i64,
    /// 上传大小（字节），用于估算临时卷容量
    #[serde(default)]
    pub upload_size: Option<u64>,
}

impl IngestRequest {
    pub fn shape(&self) -> IngestShape {
        IngestShape::detect(&self.name)
    }

    pub fn validate(&self) -> MediaflowResult<IngestShape> {
        for (field, value) in [
            ("name", &self.name),
            ("url", &self.url),
            ("token", &self.token),
            ("gid", &self.gid),
            ("uid", &self.uid),
        ] {
            if value.trim().is_empty() {
                return Err(MediaflowError::validation(format!("导入请求缺少 {field}")));
            }
        }

        let shape = self.shape();
        match (shape, self.entity_type) {
            (IngestShape::Archive, Some(entity_type)) => Err(MediaflowError::validation(format!(
                "归档导入不接受媒体类型 {entity_type}"
            ))),
            (IngestShape::SingleFile, None) => {
                Err(MediaflowError::validation("单文件导入必须指定媒体类型"))
            }
            _ => Ok(shape),
        }
    }

    /// 去掉最后一个扩展名的文件名
    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }
}

/// 用户注册的算法，可指定运行在远程集群
#[derive(Debug, Clone, PartialEq)]
pub struct Algorithm {
    pub name: String,
    pub manifest: WorkflowManifest,
    pub cluster: Option<RemoteClusterConfig>,
}

/// 启动算法的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmRequest {
    pub project: i64,
    pub user: i64,
    pub token: String,
    pub gid: String,
    pub uid: String,
    /// 逗号分隔的媒体ID
    pub media_ids: String,
    /// 逗号分隔的分组名
    pub sections: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, entity_type: Option<i64>) -> IngestRequest {
        IngestRequest {
            project: 1,
            entity_type,
            token: "token".to_string(),
            url: "https://uploads.example.com/files/abc".to_string(),
            name: name.to_string(),
            section: "Dives".to_string(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            gid: "g-1".to_string(),
            uid: "u-1".to_string(),
            user: 1,
            upload_size: None,
        }
    }

    #[test]
    fn test_detect_shape() {
        assert_eq!(IngestShape::detect("dive.mp4"), IngestShape::SingleFile);
        assert_eq!(IngestShape::detect("survey.TAR"), IngestShape::Archive);
        assert_eq!(IngestShape::detect("survey.tar.gz"), IngestShape::Archive);
        assert_eq!(IngestShape::detect("survey.tgz"), IngestShape::Archive);
        assert_eq!(IngestShape::detect("survey.zip"), IngestShape::Archive);
        assert_eq!(IngestShape::detect("zip.mov"), IngestShape::SingleFile);
    }

    #[test]
    fn test_entity_type_must_match_shape() {
        assert!(request("dive.mp4", Some(2)).validate().is_ok());
        assert!(request("dive.mp4", None).validate().is_err());
        assert!(request("survey.zip", None).validate().is_ok());
        assert!(request("survey.zip", Some(2)).validate().is_err());
    }

    #[test]
    fn test_blank_fields_are_rejected() {
        let mut blank = request("dive.mp4", Some(2));
        blank.token = " ".to_string();
        assert!(matches!(
            blank.validate(),
            Err(MediaflowError::Validation(_))
        ));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(request("dive.01.mp4", Some(2)).base_name(), "dive.01");
        assert_eq!(request("noext", Some(2)).base_name(), "noext");
        assert_eq!(request(".hidden", Some(2)).base_name(), ".hidden");
    }
}
