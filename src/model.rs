use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps.
pub type Ms = i64;

/// One of the five fixed daily lab periods.
///
/// Labels written by this crate are always one of the standard five. Older data
/// may carry other labels, which survive as `Legacy` so reads never fail on them;
/// every write path rejects `Legacy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// 09:00-10:30
    First,
    /// 10:30-12:00
    Second,
    /// 12:00-13:30
    Third,
    /// 14:00-15:30
    Fourth,
    /// 15:30-17:00
    Fifth,
    Legacy(String),
}

impl Slot {
    pub const STANDARD: [Slot; 5] = [Slot::First, Slot::Second, Slot::Third, Slot::Fourth, Slot::Fifth];

    pub fn as_str(&self) -> &str {
        match self {
            Slot::First => "09:00-10:30",
            Slot::Second => "10:30-12:00",
            Slot::Third => "12:00-13:30",
            Slot::Fourth => "14:00-15:30",
            Slot::Fifth => "15:30-17:00",
            Slot::Legacy(label) => label,
        }
    }

    /// Parse one of the five standard labels. Anything else is `None`.
    pub fn parse_standard(label: &str) -> Option<Slot> {
        let label = label.trim();
        Slot::STANDARD.into_iter().find(|s| s.as_str() == label)
    }

    /// Tolerant parse for stored data: unknown labels become `Legacy`.
    pub fn from_label(label: &str) -> Slot {
        Slot::parse_standard(label).unwrap_or_else(|| Slot::Legacy(label.to_string()))
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, Slot::Legacy(_))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Slot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Slot::from_label(&label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcStatus {
    Active,
    Maintenance,
    Inactive,
}

impl PcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PcStatus::Active => "active",
            PcStatus::Maintenance => "maintenance",
            PcStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(PcStatus::Active),
            "maintenance" => Some(PcStatus::Maintenance),
            "inactive" => Some(PcStatus::Inactive),
            _ => None,
        }
    }
}

/// Hardware description of a PC. Only informational; nothing here is validated
/// beyond length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcSpecs {
    pub processor: Option<String>,
    pub ram: Option<String>,
    pub storage: Option<String>,
    pub os: Option<String>,
    pub notes: Option<String>,
}

impl PcSpecs {
    /// Overlay the fields set in `patch`. An empty string clears a field.
    pub fn merge(&mut self, patch: PcSpecs) {
        let fields = [
            (&mut self.processor, patch.processor),
            (&mut self.ram, patch.ram),
            (&mut self.storage, patch.storage),
            (&mut self.os, patch.os),
            (&mut self.notes, patch.notes),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                let value = value.trim();
                *field = (!value.is_empty()).then(|| value.to_string());
            }
        }
    }
}

/// A lab PC, the unit that gets booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pc {
    pub id: Ulid,
    /// e.g. `CS-01`
    pub code: String,
    pub row: u8,
    pub status: PcStatus,
    pub specs: PcSpecs,
    pub created_by: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Pc {
    pub fn is_active(&self) -> bool {
        self.status == PcStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }
}

/// Informational only; the conflict checker never preempts on priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub pc_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub status: BookingStatus,
    /// Denormalized display name of whoever the booking is for. Trimmed on write.
    pub person_name: String,
    pub student_id: Option<Ulid>,
    pub batch_id: Option<Ulid>,
    pub teacher_id: Option<Ulid>,
    pub priority: Priority,
    pub purpose: Option<String>,
    pub notes: String,
    /// `false` scopes the booking out of every query and constraint.
    pub is_active: bool,
    pub booked_by: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Whether this booking holds its PC and its person for the slot.
    pub fn occupies(&self) -> bool {
        self.is_active && self.status == BookingStatus::Confirmed
    }

    /// Trimmed, case-preserved person name, or `None` when empty.
    pub fn person_key(&self) -> Option<&str> {
        person_key(&self.person_name)
    }

    pub fn append_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }
}

pub fn person_key(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: Ulid,
    pub name: String,
    pub batch_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: Ulid,
    pub name: String,
    /// The batch's fixed lab period.
    pub timing: Slot,
}

/// WAL record format. Booking events carry the full record so replay never
/// depends on the order fields were patched in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PcRegistered { pc: Pc },
    PcUpdated { pc: Pc },
    PcRemoved { id: Ulid },
    StudentRegistered { student: StudentRecord },
    BatchRegistered { batch: BatchRecord },
    BookingCreated { booking: Booking },
    /// Replicated bookings, committed as one record.
    BookingsCreated { bookings: Vec<Booking> },
    BookingUpdated { booking: Booking },
    BookingDeleted { id: Ulid },
    BookingsCleared { date: NaiveDate, ids: Vec<Ulid> },
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PcDraft {
    pub id: Ulid,
    pub code: String,
    pub row: u8,
    pub status: PcStatus,
    pub specs: PcSpecs,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PcPatch {
    pub code: Option<String>,
    pub row: Option<u8>,
    pub status: Option<PcStatus>,
    pub specs: Option<PcSpecs>,
}

#[derive(Debug, Clone, Default)]
pub struct PcFilter {
    pub row: Option<u8>,
    pub status: Option<PcStatus>,
}

#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub id: Ulid,
    pub pc_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub person_name: String,
    pub student_id: Option<Ulid>,
    pub batch_id: Option<Ulid>,
    pub teacher_id: Option<Ulid>,
    pub priority: Priority,
    pub purpose: Option<String>,
    pub notes: String,
    pub booked_by: Option<String>,
}

impl BookingDraft {
    pub fn new(id: Ulid, pc_id: Ulid, date: NaiveDate, slot: Slot, person_name: impl Into<String>) -> Self {
        Self {
            id,
            pc_id,
            date,
            slot,
            person_name: person_name.into(),
            student_id: None,
            batch_id: None,
            teacher_id: None,
            priority: Priority::Normal,
            purpose: None,
            notes: String::new(),
            booked_by: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub pc_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub person_name: Option<String>,
    pub status: Option<BookingStatus>,
    pub priority: Option<Priority>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub date: Option<NaiveDate>,
    pub slot: Option<Slot>,
    pub pc_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.date.is_none_or(|d| b.date == d)
            && self.slot.as_ref().is_none_or(|s| &b.slot == s)
            && self.pc_id.is_none_or(|p| b.pc_id == p)
            && self.status.is_none_or(|s| b.status == s)
    }
}

// ── Query result types ───────────────────────────────────────────

/// Enough of a booking to tell an operator who holds what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSummary {
    pub id: Ulid,
    pub pc_id: Ulid,
    /// `None` when the PC has since been deleted.
    pub pc_code: Option<String>,
    pub date: NaiveDate,
    pub slot: Slot,
    pub person_name: String,
    pub purpose: Option<String>,
    pub status: BookingStatus,
}
