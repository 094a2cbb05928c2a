use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(JobStatus {
    Queued => "queued",
    Running => "running",
    Failed => "failed",
});

str_enum!(JobKind {
    IngestDocument => "ingest_document",
    RunScenes => "run_scenes",
    RunStyle => "run_style",
    RunExtraction => "run_extraction",
    RunContinuity => "run_continuity",
});

str_enum!(Stage {
    Ingest => "ingest",
    Scenes => "scenes",
    Style => "style",
    Extraction => "extraction",
    Continuity => "continuity",
});

str_enum!(StageState {
    Pending => "pending",
    Ok => "ok",
    Failed => "failed",
});

str_enum!(ClaimStatus {
    Inferred => "inferred",
    Confirmed => "confirmed",
    Superseded => "superseded",
});

str_enum!(EntityKind {
    Character => "character",
    Location => "location",
    Item => "item",
    Other => "other",
});

str_enum!(IssueStatus {
    Open => "open",
    Resolved => "resolved",
});

str_enum!(IssueSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl JobKind {
    /// Pipeline stage this job kind drives.
    pub fn stage(&self) -> Stage {
        match self {
            JobKind::IngestDocument => Stage::Ingest,
            JobKind::RunScenes => Stage::Scenes,
            JobKind::RunStyle => Stage::Style,
            JobKind::RunExtraction => Stage::Extraction,
            JobKind::RunContinuity => Stage::Continuity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn job_status_round_trips() {
        for s in [JobStatus::Queued, JobStatus::Running, JobStatus::Failed] {
            assert_eq!(JobStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = JobStatus::from_str("done").unwrap_err();
        match err {
            DatabaseError::InvalidEnum { field, value } => {
                assert_eq!(field, "JobStatus");
                assert_eq!(value, "done");
            }
            other => panic!("Expected InvalidEnum, got: {other}"),
        }
    }

    #[test]
    fn job_kind_maps_to_stage() {
        assert_eq!(JobKind::IngestDocument.stage(), Stage::Ingest);
        assert_eq!(JobKind::RunExtraction.stage(), Stage::Extraction);
        assert_eq!(JobKind::RunContinuity.stage(), Stage::Continuity);
    }
}
