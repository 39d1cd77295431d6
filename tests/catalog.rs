use course_downloader::common::models::{BlockKind, CourseBlock, EncodedVideos, VideoEncoding, VideoQuality};
use course_downloader::common::utils::{format_size, sanitize_file_stem, unique_file_stem};
use course_downloader::config::DownloaderConfig;
use course_downloader::downloader::{DownloadState, DownloadTask};

fn encoding(name: &str, size: u64) -> Option<VideoEncoding> {
    Some(VideoEncoding {
        url: format!("https://cdn.example.com/{}.mp4", name),
        file_size: Some(size),
    })
}

fn all_encodings() -> EncodedVideos {
    EncodedVideos {
        mobile_low: encoding("low", 100),
        mobile_high: encoding("high", 200),
        desktop_mp4: encoding("desktop", 300),
        fallback: encoding("fallback", 400),
        hls: encoding("hls", 0),
        youtube: None,
    }
}

fn picked(videos: &EncodedVideos, quality: VideoQuality) -> Option<String> {
    videos
        .preferred_downloadable(quality)
        .map(|e| e.url.rsplit('/').next().unwrap().to_string())
}

#[test]
fn test_quality_selection_order() {
    let videos = all_encodings();
    assert_eq!(picked(&videos, VideoQuality::Low).as_deref(), Some("low.mp4"));
    assert_eq!(picked(&videos, VideoQuality::Medium).as_deref(), Some("high.mp4"));
    assert_eq!(picked(&videos, VideoQuality::High).as_deref(), Some("desktop.mp4"));
    assert_eq!(picked(&videos, VideoQuality::Auto).as_deref(), Some("high.mp4"));

    let only_low = EncodedVideos {
        mobile_low: encoding("low", 100),
        ..EncodedVideos::default()
    };
    assert_eq!(picked(&only_low, VideoQuality::High).as_deref(), Some("low.mp4"));
}

#[test]
fn test_quality_selection_falls_back() {
    let videos = EncodedVideos {
        mobile_high: Some(VideoEncoding {
            url: "  ".to_string(),
            file_size: None,
        }),
        fallback: encoding("fallback", 400),
        hls: encoding("hls", 0),
        ..EncodedVideos::default()
    };
    assert_eq!(picked(&videos, VideoQuality::Auto).as_deref(), Some("fallback.mp4"));

    let streaming_only = EncodedVideos {
        hls: encoding("hls", 0),
        youtube: encoding("yt", 0),
        ..EncodedVideos::default()
    };
    assert!(streaming_only.preferred_downloadable(VideoQuality::Auto).is_none());
}

#[test]
fn test_task_from_block() {
    let block = CourseBlock {
        id: "block-v1:Org+Course+Run+type@video+block@intro".to_string(),
        course_id: "course-v1:Org+Course+Run".to_string(),
        display_name: "课程介绍".to_string(),
        kind: BlockKind::Video,
        encoded_videos: EncodedVideos {
            desktop_mp4: Some(VideoEncoding {
                url: "https://cdn.example.com/intro.MP4?sig=1".to_string(),
                file_size: Some(3 * 1024 * 1024),
            }),
            ..EncodedVideos::default()
        },
    };

    let task = DownloadTask::from_block(&block, VideoQuality::High, "alice").unwrap();
    assert_eq!(
        task.file_name,
        "block-v1_Org_Course_Run_type_video_block_intro_26fc3a7ffe17cf84.mp4"
    );
    assert_eq!(task.state, DownloadState::Waiting);
    assert_eq!(task.file_size, 3 * 1024 * 1024);
    assert_eq!(task.file_size_mb(), 3.0);
    assert_eq!(task.formatted_file_size(), "3.0 MB");
    assert_eq!(task.id, DownloadTask::make_id("alice", &block.id));
    assert_ne!(task.id, DownloadTask::make_id("bob", &block.id));

    let record = task.to_record();
    assert_eq!(DownloadTask::from_record(record), task);
}

#[test]
fn test_ids_differing_in_punctuation_get_distinct_files() {
    let make = |id: &str| CourseBlock {
        id: id.to_string(),
        course_id: "c1".to_string(),
        display_name: id.to_string(),
        kind: BlockKind::Video,
        encoded_videos: all_encodings(),
    };
    let plus = DownloadTask::from_block(&make("blk+x"), VideoQuality::Auto, "alice").unwrap();
    let at = DownloadTask::from_block(&make("blk@x"), VideoQuality::Auto, "alice").unwrap();

    assert_eq!(sanitize_file_stem("blk+x"), sanitize_file_stem("blk@x"));
    assert_ne!(plus.file_name, at.file_name);
    assert!(plus.file_name.starts_with("blk_x_"));
    assert_eq!(unique_file_stem("blk+x"), unique_file_stem("blk+x"));
}

#[test]
fn test_task_requires_file_extension() {
    let block = CourseBlock {
        id: "b1".to_string(),
        course_id: "c1".to_string(),
        display_name: "无扩展名".to_string(),
        kind: BlockKind::Video,
        encoded_videos: EncodedVideos {
            mobile_high: Some(VideoEncoding {
                url: "https://cdn.example.com/videos/stream".to_string(),
                file_size: None,
            }),
            ..EncodedVideos::default()
        },
    };
    assert!(DownloadTask::from_block(&block, VideoQuality::Auto, "alice").is_none());
}

#[test]
fn test_projected_size_depends_on_quality() {
    let block = CourseBlock {
        id: "b1".to_string(),
        course_id: "c1".to_string(),
        display_name: "视频".to_string(),
        kind: BlockKind::Video,
        encoded_videos: all_encodings(),
    };
    assert_eq!(block.projected_size(VideoQuality::Low), 100);
    assert_eq!(block.projected_size(VideoQuality::High), 300);

    let mut problem = block.clone();
    problem.kind = BlockKind::Problem;
    assert_eq!(problem.projected_size(VideoQuality::High), 0);
}

#[test]
fn test_video_quality_parsing() {
    assert_eq!("720p".parse::<VideoQuality>().unwrap(), VideoQuality::High);
    assert_eq!("LOW".parse::<VideoQuality>().unwrap(), VideoQuality::Low);
    assert_eq!("auto".parse::<VideoQuality>().unwrap(), VideoQuality::Auto);
    assert!("1080p".parse::<VideoQuality>().is_err());
    assert_eq!(VideoQuality::Medium.to_string(), "540p");
}

#[test]
fn test_size_helpers() {
    assert_eq!(format_size(512), "512 B");
    assert_eq!(format_size(2048), "2.0 KB");
    assert_eq!(format_size(1288490189), "1.2 GB");
    assert_eq!(sanitize_file_stem("a/b c"), "a_b_c");
    assert_eq!(sanitize_file_stem(""), "_");
}

#[test]
fn test_partial_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coursedl.json");
    std::fs::write(&path, r#"{ "user_id": "alice", "video_quality": "high" }"#).unwrap();

    let config = DownloaderConfig::load(&path).unwrap();
    assert_eq!(config.user_id, "alice");
    assert_eq!(config.video_quality, VideoQuality::High);
    assert!(config.wifi_only);
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.state_file_path(), config.root_dir.join("downloads.json"));

    let missing = DownloaderConfig::load_or_default(dir.path().join("none.json")).unwrap();
    assert_eq!(missing, DownloaderConfig::default());
}
