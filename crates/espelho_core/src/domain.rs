//! crates/espelho_core/src/domain.rs
//!
//! Defines the pure, core data structures for the Sombra module.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Datelike, Duration, Utc};
use uuid::Uuid;

/// Citation fallback used when the generated commentary names no master
/// from the roster.
pub const GENERAL_TEACHINGS: &str = "Ensinamentos gerais dos mestres";

/// Milliseconds in one 30-day month, the unit the phase calculator counts in.
const MILLIS_PER_MONTH: i64 = 1000 * 60 * 60 * 24 * 30;

/// Ordinal tier governing how many Sombra questions a user may answer per
/// week. Derived from enrollment age, never trusted from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    One,
    Two,
    Three,
    Four,
}

impl Phase {
    /// Computes the phase from enrollment start and the current time.
    ///
    /// Elapsed time is measured in whole 30-day months; the 3/6/9 month
    /// boundaries fall into the higher phase (strict less-than).
    pub fn from_elapsed(start_date: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let months_elapsed = (now - start_date).num_milliseconds() / MILLIS_PER_MONTH;
        if months_elapsed < 3 {
            Phase::One
        } else if months_elapsed < 6 {
            Phase::Two
        } else if months_elapsed < 9 {
            Phase::Three
        } else {
            Phase::Four
        }
    }

    /// Weekly answer quota for this phase.
    pub fn questions_per_week(self) -> u32 {
        match self {
            Phase::One => 1,
            Phase::Two => 2,
            Phase::Three => 3,
            Phase::Four => 4,
        }
    }

    /// The storage/wire form (`"phase1"`..`"phase4"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::One => "phase1",
            Phase::Two => "phase2",
            Phase::Three => "phase3",
            Phase::Four => "phase4",
        }
    }

    /// Parses the storage form back into a phase.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "phase1" => Some(Phase::One),
            "phase2" => Some(Phase::Two),
            "phase3" => Some(Phase::Three),
            "phase4" => Some(Phase::Four),
            _ => None,
        }
    }
}

/// Per-user aggregate tracking enrollment into the Sombra module.
///
/// `current_phase` is a display cache: it is persisted on every advance but
/// always recomputed from `start_date` before use.
#[derive(Debug, Clone)]
pub struct SombraProgress {
    pub user_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub last_question_date: Option<DateTime<Utc>>,
    pub questions_answered_count: u32,
    pub current_phase: Phase,
}

impl SombraProgress {
    /// A fresh progress record for a user enrolling now.
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            start_date: now,
            last_question_date: None,
            questions_answered_count: 0,
            current_phase: Phase::One,
        }
    }
}

/// Immutable record of one answered question plus generated commentary.
/// Append-only; never mutated or deleted.
#[derive(Debug, Clone)]
pub struct SombraResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub question_text: String,
    pub user_answer: String,
    pub ai_response: String,
    pub masters_cited: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub week_number: u32,
}

/// The merge-update the recorder applies to the progress record after
/// appending a response. Other progress fields are left untouched.
#[derive(Debug, Clone)]
pub struct ProgressAdvance {
    pub last_question_date: DateTime<Utc>,
    pub questions_answered_count: u32,
    pub current_phase: Phase,
}

/// The result of an eligibility check: whether the user may answer right
/// now, diagnostic counts, and the next eligible instant when blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub can_answer: bool,
    /// 1 when `can_answer`, 0 otherwise.
    pub questions_available_today: u32,
    pub answered_this_week: u32,
    pub questions_per_week: u32,
    pub next_question_at: Option<DateTime<Utc>>,
}

impl Eligibility {
    /// The fail-closed result for a user with no progress record.
    pub fn not_enrolled() -> Self {
        Self {
            can_answer: false,
            questions_available_today: 0,
            answered_this_week: 0,
            questions_per_week: 0,
            next_question_at: None,
        }
    }
}

/// 1-indexed week number of `now` relative to enrollment:
/// `floor((now - start) / 7 days) + 1`.
pub fn week_number(start_date: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    ((now - start_date).num_days() / 7) as u32 + 1
}

/// Midnight (UTC) at the start of the calendar day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

/// Midnight (UTC) of the most recent Sunday, the start of the weekly
/// eligibility window containing `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_since_sunday = now.date_naive().weekday().num_days_from_sunday() as i64;
    day_start(now) - Duration::days(days_since_sunday)
}
