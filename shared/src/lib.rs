use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Pipeline mode requested at upload time. Each variant maps to one
/// detector invocation and a fixed output-filename prefix.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskVariant {
    #[default]
    Detect,
    DetectFace,
    Segment,
    FaceSegment,
    Pose,
    #[serde(rename = "classification")]
    #[strum(serialize = "classification")]
    Classify,
}

impl TaskVariant {
    /// Prefix prepended to the source filename to form the result
    /// artifact name.
    pub fn output_prefix(&self) -> &'static str {
        match self {
            TaskVariant::Detect => "detected_",
            TaskVariant::DetectFace => "face_detected_",
            TaskVariant::Segment => "segmented_",
            TaskVariant::FaceSegment => "face_segmented_",
            TaskVariant::Pose => "pose_detected_",
            TaskVariant::Classify => "classified_",
        }
    }

    /// Parses a wire name, falling back to the default variant for
    /// anything unrecognized.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub file_name: String,
    pub original_file_name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub process_type: TaskVariant,
    pub already_processed: bool,
    pub already_running: bool,
    pub launched: bool,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub file_name: String,
    pub size: u64,
    pub created_at: i64,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct FileListResponse {
    pub success: bool,
    pub files: Vec<FileEntry>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct StatusResponse {
    pub message: String,
    pub status: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for (name, variant) in [
            ("detect", TaskVariant::Detect),
            ("detect_face", TaskVariant::DetectFace),
            ("segment", TaskVariant::Segment),
            ("face_segment", TaskVariant::FaceSegment),
            ("pose", TaskVariant::Pose),
            ("classification", TaskVariant::Classify),
        ] {
            assert_eq!(TaskVariant::parse_or_default(name), variant);
            assert_eq!(variant.to_string(), name);
        }
    }

    #[test]
    fn unknown_wire_name_falls_back_to_detect() {
        assert_eq!(TaskVariant::parse_or_default("mosaic"), TaskVariant::Detect);
        assert_eq!(TaskVariant::parse_or_default(""), TaskVariant::Detect);
    }

    #[test]
    fn output_prefixes() {
        assert_eq!(TaskVariant::Detect.output_prefix(), "detected_");
        assert_eq!(TaskVariant::DetectFace.output_prefix(), "face_detected_");
        assert_eq!(TaskVariant::Segment.output_prefix(), "segmented_");
        assert_eq!(TaskVariant::FaceSegment.output_prefix(), "face_segmented_");
        assert_eq!(TaskVariant::Pose.output_prefix(), "pose_detected_");
        assert_eq!(TaskVariant::Classify.output_prefix(), "classified_");
    }
}
