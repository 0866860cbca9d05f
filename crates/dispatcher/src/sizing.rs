//! 临时卷容量估算

const MEBIBYTE: u64 = 1024 * 1024;

/// 上传文件解码与派生产物需要的余量倍数
pub const SCRATCH_MULTIPLIER: u64 = 4;

/// 字节数向上取整为 Mi 单位，例如 `"400Mi"`
pub fn bytes_to_mi_str(num_bytes: u64) -> String {
    format!("{}Mi", num_bytes.div_ceil(MEBIBYTE))
}

/// 临时卷的存储请求；上传大小未知时使用默认值
pub fn scratch_size(upload_size: Option<u64>, default_size: &str) -> String {
    match upload_size {
        Some(size) if size > 0 => bytes_to_mi_str(size.saturating_mul(SCRATCH_MULTIPLIER)),
        _ => default_size.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundred_mebibytes_requests_four_hundred() {
        assert_eq!(scratch_size(Some(100 * MEBIBYTE), "10Gi"), "400Mi");
    }

    #[test]
    fn test_rounds_up_partial_mebibytes() {
        assert_eq!(bytes_to_mi_str(1), "1Mi");
        assert_eq!(bytes_to_mi_str(MEBIBYTE + 1), "2Mi");
        assert_eq!(bytes_to_mi_str(0), "0Mi");
    }

    #[test]
    fn test_unknown_size_uses_default() {
        assert_eq!(scratch_size(None, "10Gi"), "10Gi");
        assert_eq!(scratch_size(Some(0), "10Gi"), "10Gi");
    }
}
