use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// 视频清晰度选项（与课程目录中的编码一一对应）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    #[default]
    Auto, // 自动
    Low,    // 流畅 360P
    Medium, // 清晰 540P
    High,   // 高清 720P
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Low => write!(f, "360p"),
            Self::Medium => write!(f, "540p"),
            Self::High => write!(f, "720p"),
        }
    }
}

impl FromStr for VideoQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "low" | "360" | "360p" => Ok(Self::Low),
            "medium" | "540" | "540p" => Ok(Self::Medium),
            "high" | "720" | "720p" => Ok(Self::High),
            other => Err(format!("未知的视频质量: {}", other)),
        }
    }
}

// 课程目录中的内容块类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    #[default]
    Video,
    Html,
    Problem,
    Discussion,
    Unknown,
}

// 单个编码后的视频源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoEncoding {
    pub url: String,
    #[serde(default)]
    pub file_size: Option<u64>, // 字节
}

// 一个视频块的所有编码
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EncodedVideos {
    #[serde(default)]
    pub mobile_low: Option<VideoEncoding>,
    #[serde(default)]
    pub mobile_high: Option<VideoEncoding>,
    #[serde(default)]
    pub desktop_mp4: Option<VideoEncoding>,
    #[serde(default)]
    pub fallback: Option<VideoEncoding>,
    #[serde(default)]
    pub hls: Option<VideoEncoding>, // 流媒体，不可下载
    #[serde(default)]
    pub youtube: Option<VideoEncoding>, // 外链，不可下载
}

impl EncodedVideos {
    /// 按清晰度选出用于下载的编码，找不到时按顺序降级
    pub fn preferred_downloadable(&self, quality: VideoQuality) -> Option<&VideoEncoding> {
        let order: [&Option<VideoEncoding>; 3] = match quality {
            VideoQuality::Low => [&self.mobile_low, &self.mobile_high, &self.desktop_mp4],
            VideoQuality::Medium => [&self.mobile_high, &self.mobile_low, &self.desktop_mp4],
            VideoQuality::High => [&self.desktop_mp4, &self.mobile_high, &self.mobile_low],
            VideoQuality::Auto => [&self.mobile_high, &self.desktop_mp4, &self.mobile_low],
        };

        order
            .into_iter()
            .chain(std::iter::once(&self.fallback))
            .filter_map(|encoding| encoding.as_ref())
            .find(|encoding| !encoding.url.trim().is_empty())
    }
}

// 课程目录中的内容块
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseBlock {
    pub id: String,
    pub course_id: String,
    pub display_name: String,
    #[serde(default)]
    pub kind: BlockKind,
    #[serde(default)]
    pub encoded_videos: EncodedVideos,
}

impl CourseBlock {
    pub fn is_video(&self) -> bool {
        self.kind == BlockKind::Video
    }

    // 当前清晰度下可下载的视频源
    pub fn downloadable_video(&self, quality: VideoQuality) -> Option<&VideoEncoding> {
        if !self.is_video() {
            return None;
        }
        self.encoded_videos.preferred_downloadable(quality)
    }

    // 当前清晰度下预计的下载大小
    pub fn projected_size(&self, quality: VideoQuality) -> u64 {
        self.downloadable_video(quality)
            .and_then(|encoding| encoding.file_size)
            .unwrap_or(0)
    }
}
