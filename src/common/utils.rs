use sha2::{Digest, Sha256};

pub const BYTES_PER_MB: u64 = 1024 * 1024;
pub const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

// 字节数转换为 MB
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}

// 将字节数格式化为可读字符串，如 "1.2 GB"、"350.0 MB"
pub fn format_size(bytes: u64) -> String {
    if bytes >= BYTES_PER_GB {
        format!("{:.1} GB", bytes as f64 / BYTES_PER_GB as f64)
    } else if bytes >= BYTES_PER_MB {
        format!("{:.1} MB", bytes_to_mb(bytes))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

// 把任意 id 转换为可以安全用作文件名的字符串
pub fn sanitize_file_stem(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

// 文件名主体：清理后的 id 加上原始 id 的哈希前缀，不同 id 不会得到同一个文件名
pub fn unique_file_stem(raw: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
    format!("{}_{}", sanitize_file_stem(raw), &digest[..16])
}
