//! Note aggregate model.
//!
//! # Responsibility
//! - Define the typed shape of notes, fragments and their enum codes.
//! - Provide factories that pre-populate server-generated fields.
//!
//! # Invariants
//! - `id == 0` marks an entity that no store has persisted yet.
//! - Guids are hyphenated v4 UUID strings once generated by core.
//! - Enum codes read back from storage must map to a known variant.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Numeric identifier assigned by a store; `0` means unassigned.
pub type RecordId = i64;

/// Returns a fresh globally unique identifier string.
pub fn new_guid() -> String {
    Uuid::new_v4().to_string()
}

/// Creation instant split into whole seconds and sub-second nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    /// Captures the current system time.
    pub fn now() -> Self {
        // A clock before the unix epoch degrades to a zero timestamp.
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            nanos: i32::try_from(elapsed.subsec_nanos()).unwrap_or(0),
        }
    }

    /// Returns whether no creation time was ever assigned.
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }
}

/// Error raised when an integer code does not map to a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: i32,
}

impl Display for UnknownCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} code `{}`", self.kind, self.code)
    }
}

impl Error for UnknownCode {}

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        #[repr(i32)]
        pub enum $name {
            #[default]
            $( $(#[$vmeta])* $variant = $code ),+
        }

        impl $name {
            /// Returns the integer code persisted by storage backends.
            pub fn code(self) -> i32 {
                self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = UnknownCode;

            fn try_from(code: i32) -> Result<Self, Self::Error> {
                match code {
                    $( $code => Ok(Self::$variant), )+
                    _ => Err(UnknownCode { kind: $kind, code }),
                }
            }
        }
    };
}

coded_enum! {
    /// Clinical purpose of a note.
    NoteType, "note type" {
        NoNoteType = 0,
        ContinuedCareDocumentation = 1,
        InitialEvaluation = 2,
        Consultation = 3,
        Procedure = 4,
        Discharge = 5,
    }
}

coded_enum! {
    /// Completion state shared by notes and fragments.
    RecordStatus, "record status" {
        Incomplete = 0,
        Complete = 1,
        Amended = 2,
        Retracted = 3,
    }
}

coded_enum! {
    /// Clinical priority of a fragment.
    RecordPriority, "record priority" {
        NoPriority = 0,
        Low = 1,
        Medium = 2,
        High = 3,
        Urgent = 4,
    }
}

coded_enum! {
    /// Section of the note a fragment belongs to.
    FragmentType, "fragment topic" {
        NoTopic = 0,
        Subjective = 1,
        Objective = 2,
        Assessment = 3,
        Plan = 4,
    }
}

/// One coded section of a note.
///
/// Owned by exactly one note through `note_guid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFragment {
    pub id: RecordId,
    pub date_created: Timestamp,
    pub note_fragment_guid: String,
    pub note_guid: String,
    pub issue_guid: String,
    pub icd_10_code: String,
    pub icd_10_long: String,
    pub description: String,
    pub status: RecordStatus,
    pub priority: RecordPriority,
    pub topic: FragmentType,
    pub content: String,
    pub tags: Vec<String>,
}

impl NoteFragment {
    /// Creates an unsaved fragment with a fresh guid and creation time.
    pub fn new() -> Self {
        Self {
            date_created: Timestamp::now(),
            note_fragment_guid: new_guid(),
            ..Self::default()
        }
    }
}

/// Aggregate root: a clinical note with its fragments and tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: RecordId,
    pub date_created: Timestamp,
    pub note_guid: String,
    pub visit_guid: String,
    pub author_guid: String,
    pub patient_guid: String,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub status: RecordStatus,
    pub fragments: Vec<NoteFragment>,
    pub tags: Vec<String>,
}

impl Note {
    /// Creates an unsaved note with a fresh guid and creation time.
    pub fn new() -> Self {
        Self {
            date_created: Timestamp::now(),
            note_guid: new_guid(),
            ..Self::default()
        }
    }

    /// Returns whether a store has already assigned this note an id.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }
}
