//! crates/espelho_core/src/engine.rs
//!
//! The Eligibility & Progression Engine for the Sombra module: phase-based
//! weekly quotas, daily/weekly answer gating, deterministic question
//! selection, and atomic response recording.
//!
//! Every operation takes `now` explicitly so callers (and tests) control the
//! clock; handlers pass `Utc::now()`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::catalog::SombraCatalog;
use crate::domain::{
    day_start, week_number, week_start, Eligibility, Phase, ProgressAdvance, SombraProgress,
    SombraResponse, GENERAL_TEACHINGS,
};
use crate::ports::{CommentaryService, PortError, PortResult, SombraStore};

/// Scans `commentary` for each roster name, case-insensitively, and returns
/// the matches in roster order. Falls back to the general-teachings sentinel
/// when nothing matches, so a response never carries an empty citation list.
pub fn extract_cited_masters(commentary: &str, masters: &[String]) -> Vec<String> {
    let haystack = commentary.to_lowercase();
    let cited: Vec<String> = masters
        .iter()
        .filter(|master| haystack.contains(&master.to_lowercase()))
        .cloned()
        .collect();

    if cited.is_empty() {
        vec![GENERAL_TEACHINGS.to_string()]
    } else {
        cited
    }
}

//=========================================================================================
// The Engine
//=========================================================================================

/// The Sombra progression engine. Owns the catalog and talks to the store
/// and commentary collaborators through their ports.
pub struct SombraEngine {
    store: Arc<dyn SombraStore>,
    commentary: Arc<dyn CommentaryService>,
    catalog: SombraCatalog,
}

impl SombraEngine {
    pub fn new(
        store: Arc<dyn SombraStore>,
        commentary: Arc<dyn CommentaryService>,
        catalog: SombraCatalog,
    ) -> Self {
        Self {
            store,
            commentary,
            catalog,
        }
    }

    /// Enrolls the user into the Sombra module. Idempotent: an existing
    /// progress record is returned untouched, `start_date` included.
    pub async fn initialize_progress(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<SombraProgress> {
        self.store
            .initialize_progress(&SombraProgress::new(user_id, now))
            .await
    }

    /// The user's progress with `current_phase` recomputed from
    /// `start_date`. The stored phase is a display cache and is never
    /// returned as-is.
    pub async fn progress(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Option<SombraProgress>> {
        let Some(mut progress) = self.store.get_progress(user_id).await? else {
            return Ok(None);
        };
        progress.current_phase = Phase::from_elapsed(progress.start_date, now);
        Ok(Some(progress))
    }

    /// Whether the user may answer a question right now.
    ///
    /// Eligible iff no answer was recorded today AND this week's count is
    /// under the phase quota. When blocked, "answered today" takes
    /// precedence and the next eligible instant is tomorrow midnight;
    /// a spent weekly quota points at the next week window instead.
    ///
    /// A user with no progress record is ineligible with zero counts, not
    /// an error.
    pub async fn check_eligibility(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> PortResult<Eligibility> {
        let Some(progress) = self.store.get_progress(user_id).await? else {
            return Ok(Eligibility::not_enrolled());
        };

        let phase = Phase::from_elapsed(progress.start_date, now);
        let questions_per_week = phase.questions_per_week();

        let this_week = week_start(now);
        let answered_this_week = self.store.count_responses_since(user_id, this_week).await?;

        let today = day_start(now);
        let answered_today = self.store.has_response_since(user_id, today).await?;

        let can_answer = !answered_today && answered_this_week < questions_per_week;

        let next_question_at = if can_answer {
            None
        } else if answered_today {
            Some(today + Duration::days(1))
        } else {
            Some(this_week + Duration::days(7))
        };

        Ok(Eligibility {
            can_answer,
            questions_available_today: if can_answer { 1 } else { 0 },
            answered_this_week,
            questions_per_week,
            next_question_at,
        })
    }

    /// The next question to present: the first bank question the user has
    /// never answered, in bank order. Once the whole bank has been used the
    /// selection wraps to the first question again, so long-running users
    /// recycle through the bank indefinitely.
    ///
    /// Returns `None` only when the user has no progress record.
    pub async fn next_question(&self, user_id: Uuid) -> PortResult<Option<String>> {
        if self.store.get_progress(user_id).await?.is_none() {
            return Ok(None);
        }

        let answered = self.store.answered_question_texts(user_id).await?;
        let next = self
            .catalog
            .questions
            .iter()
            .find(|q| !answered.contains(*q))
            .or_else(|| self.catalog.questions.first());

        Ok(next.cloned())
    }

    /// Records an answered question: generates commentary, extracts cited
    /// masters, then appends the response and advances the progress record
    /// in one atomic store call.
    ///
    /// The eligibility check is repeated here under the progress snapshot
    /// read at the top of the call, and the store's optimistic count check
    /// rejects a racing submission, so two tabs cannot both record within
    /// the same quota slot.
    ///
    /// Commentary is generated before any write; a generation failure
    /// leaves no record behind.
    pub async fn record_answer(
        &self,
        user_id: Uuid,
        question_text: &str,
        user_answer: &str,
        now: DateTime<Utc>,
    ) -> PortResult<SombraResponse> {
        let progress = self
            .store
            .get_progress(user_id)
            .await?
            .ok_or(PortError::NotInitialized(user_id))?;

        let eligibility = self.check_eligibility(user_id, now).await?;
        if !eligibility.can_answer {
            return Err(PortError::NotEligible(user_id));
        }

        let commentary = self
            .commentary
            .generate_commentary(question_text, user_answer, &self.catalog.masters)
            .await?;
        if commentary.trim().is_empty() {
            return Err(PortError::GenerationUnavailable(
                "commentary service returned empty text".to_string(),
            ));
        }

        let masters_cited = extract_cited_masters(&commentary, &self.catalog.masters);

        let response = SombraResponse {
            id: Uuid::new_v4(),
            user_id,
            question_text: question_text.to_string(),
            user_answer: user_answer.to_string(),
            ai_response: commentary,
            masters_cited,
            created_at: now,
            week_number: week_number(progress.start_date, now),
        };

        let advance = ProgressAdvance {
            last_question_date: now,
            questions_answered_count: progress.questions_answered_count + 1,
            current_phase: Phase::from_elapsed(progress.start_date, now),
        };

        self.store
            .append_response(&response, &advance, progress.questions_answered_count)
            .await?;

        Ok(response)
    }

    /// The user's most recent responses, newest first.
    pub async fn history(&self, user_id: Uuid, limit: u32) -> PortResult<Vec<SombraResponse>> {
        self.store.recent_responses(user_id, limit).await
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory stand-in for the document store.
    #[derive(Default)]
    struct InMemoryStore {
        progress: Mutex<HashMap<Uuid, SombraProgress>>,
        responses: Mutex<Vec<SombraResponse>>,
    }

    #[async_trait]
    impl SombraStore for InMemoryStore {
        async fn initialize_progress(
            &self,
            progress: &SombraProgress,
        ) -> PortResult<SombraProgress> {
            let mut map = self.progress.lock().unwrap();
            Ok(map
                .entry(progress.user_id)
                .or_insert_with(|| progress.clone())
                .clone())
        }

        async fn get_progress(&self, user_id: Uuid) -> PortResult<Option<SombraProgress>> {
            Ok(self.progress.lock().unwrap().get(&user_id).cloned())
        }

        async fn count_responses_since(
            &self,
            user_id: Uuid,
            since: DateTime<Utc>,
        ) -> PortResult<u32> {
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .filter(|r| r.user_id == user_id && r.created_at >= since)
                .count() as u32)
        }

        async fn has_response_since(
            &self,
            user_id: Uuid,
            since: DateTime<Utc>,
        ) -> PortResult<bool> {
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .any(|r| r.user_id == user_id && r.created_at >= since))
        }

        async fn answered_question_texts(&self, user_id: Uuid) -> PortResult<Vec<String>> {
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .filter(|r| r.user_id == user_id)
                .map(|r| r.question_text.clone())
                .collect())
        }

        async fn recent_responses(
            &self,
            user_id: Uuid,
            limit: u32,
        ) -> PortResult<Vec<SombraResponse>> {
            let responses = self.responses.lock().unwrap();
            let mut mine: Vec<SombraResponse> = responses
                .iter()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect();
            mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            mine.truncate(limit as usize);
            Ok(mine)
        }

        async fn append_response(
            &self,
            response: &SombraResponse,
            advance: &ProgressAdvance,
            expected_count: u32,
        ) -> PortResult<()> {
            let mut map = self.progress.lock().unwrap();
            let progress = map
                .get_mut(&response.user_id)
                .ok_or(PortError::NotInitialized(response.user_id))?;
            if progress.questions_answered_count != expected_count {
                return Err(PortError::Conflict(response.user_id));
            }
            progress.last_question_date = Some(advance.last_question_date);
            progress.questions_answered_count = advance.questions_answered_count;
            progress.current_phase = advance.current_phase;
            self.responses.lock().unwrap().push(response.clone());
            Ok(())
        }
    }

    /// Commentary stub returning a fixed text, or failing on demand.
    struct ScriptedCommentary {
        text: String,
        fail: AtomicBool,
    }

    impl ScriptedCommentary {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CommentaryService for ScriptedCommentary {
        async fn generate_commentary(
            &self,
            _question: &str,
            _answer: &str,
            _masters: &[String],
        ) -> PortResult<String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::GenerationUnavailable(
                    "scripted failure".to_string(),
                ));
            }
            Ok(self.text.clone())
        }
    }

    fn small_catalog() -> SombraCatalog {
        SombraCatalog {
            masters: vec![
                "Carl Gustav Jung".to_string(),
                "David Bohm".to_string(),
                "Joe Dispenza".to_string(),
            ],
            questions: vec![
                "Pergunta um?".to_string(),
                "Pergunta dois?".to_string(),
                "Pergunta três?".to_string(),
            ],
        }
    }

    struct Harness {
        engine: SombraEngine,
        store: Arc<InMemoryStore>,
        commentary: Arc<ScriptedCommentary>,
    }

    fn harness(commentary_text: &str) -> Harness {
        let store = Arc::new(InMemoryStore::default());
        let commentary = Arc::new(ScriptedCommentary::new(commentary_text));
        let engine = SombraEngine::new(store.clone(), commentary.clone(), small_catalog());
        Harness {
            engine,
            store,
            commentary,
        }
    }

    // 2026-01-05 is a Monday, comfortably inside a week window.
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let h = harness("texto");
        let user = Uuid::new_v4();

        let first = h.engine.initialize_progress(user, t0()).await.unwrap();
        let second = h
            .engine
            .initialize_progress(user, t0() + Duration::days(30))
            .await
            .unwrap();

        assert_eq!(first.start_date, t0());
        assert_eq!(second.start_date, t0());
        assert_eq!(second.questions_answered_count, 0);
    }

    #[tokio::test]
    async fn unenrolled_user_is_ineligible_with_zero_counts() {
        let h = harness("texto");
        let result = h
            .engine
            .check_eligibility(Uuid::new_v4(), t0())
            .await
            .unwrap();
        assert_eq!(result, Eligibility::not_enrolled());
    }

    #[tokio::test]
    async fn fresh_user_is_eligible_with_phase_one_quota() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        let result = h.engine.check_eligibility(user, t0()).await.unwrap();
        assert!(result.can_answer);
        assert_eq!(result.questions_available_today, 1);
        assert_eq!(result.answered_this_week, 0);
        assert_eq!(result.questions_per_week, 1);
        assert_eq!(result.next_question_at, None);
    }

    #[tokio::test]
    async fn answering_today_blocks_until_tomorrow_midnight() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        h.engine
            .record_answer(user, "Pergunta um?", "minha resposta", t0())
            .await
            .unwrap();

        let later = t0() + Duration::hours(3);
        let result = h.engine.check_eligibility(user, later).await.unwrap();
        assert!(!result.can_answer);
        assert_eq!(result.questions_available_today, 0);
        assert_eq!(result.answered_this_week, 1);
        assert_eq!(
            result.next_question_at,
            Some(day_start(t0()) + Duration::days(1))
        );
    }

    #[tokio::test]
    async fn exhausted_weekly_quota_blocks_until_next_week() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        // Phase 1: quota is one per week. Answer Monday, check Tuesday.
        h.engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap();

        let tuesday = t0() + Duration::days(1);
        let result = h.engine.check_eligibility(user, tuesday).await.unwrap();
        assert!(!result.can_answer);
        assert_eq!(result.answered_this_week, 1);
        assert_eq!(
            result.next_question_at,
            Some(week_start(tuesday) + Duration::days(7))
        );
    }

    #[tokio::test]
    async fn answered_today_takes_precedence_over_spent_quota() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        h.engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap();

        // Same day, quota also spent: the tomorrow-midnight branch wins.
        let result = h
            .engine
            .check_eligibility(user, t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            result.next_question_at,
            Some(day_start(t0()) + Duration::days(1))
        );
    }

    #[tokio::test]
    async fn new_week_window_restores_eligibility() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        h.engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap();

        // Ten days later: new week, still phase 1, count resets to zero.
        let later = t0() + Duration::days(10);
        let result = h.engine.check_eligibility(user, later).await.unwrap();
        assert!(result.can_answer);
        assert_eq!(result.answered_this_week, 0);
        assert_eq!(result.questions_per_week, 1);
    }

    #[tokio::test]
    async fn phase_two_allows_two_answers_in_one_week() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        // 100 days in: phase 2, quota 2. Answer Monday and Tuesday of the
        // same window, then the quota is spent.
        let monday = Utc.with_ymd_and_hms(2026, 4, 20, 10, 0, 0).unwrap();
        let result = h.engine.check_eligibility(user, monday).await.unwrap();
        assert_eq!(result.questions_per_week, 2);

        h.engine
            .record_answer(user, "Pergunta um?", "r1", monday)
            .await
            .unwrap();
        let tuesday = monday + Duration::days(1);
        h.engine
            .record_answer(user, "Pergunta dois?", "r2", tuesday)
            .await
            .unwrap();

        let wednesday = tuesday + Duration::days(1);
        let result = h.engine.check_eligibility(user, wednesday).await.unwrap();
        assert!(!result.can_answer);
        assert_eq!(result.answered_this_week, 2);
    }

    #[tokio::test]
    async fn selector_returns_none_without_progress() {
        let h = harness("texto");
        assert_eq!(h.engine.next_question(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn selector_walks_the_bank_in_order() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        assert_eq!(
            h.engine.next_question(user).await.unwrap().as_deref(),
            Some("Pergunta um?")
        );

        h.engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap();
        assert_eq!(
            h.engine.next_question(user).await.unwrap().as_deref(),
            Some("Pergunta dois?")
        );
    }

    #[tokio::test]
    async fn selector_wraps_to_bank_head_when_exhausted() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        // Answer all three bank questions across separate weeks.
        let questions = ["Pergunta um?", "Pergunta dois?", "Pergunta três?"];
        for (i, q) in questions.iter().enumerate() {
            let when = t0() + Duration::days(7 * i as i64);
            h.engine.record_answer(user, q, "resposta", when).await.unwrap();
        }

        assert_eq!(
            h.engine.next_question(user).await.unwrap().as_deref(),
            Some("Pergunta um?")
        );
    }

    #[tokio::test]
    async fn recorder_requires_initialized_progress() {
        let h = harness("texto");
        let err = h
            .engine
            .record_answer(Uuid::new_v4(), "Pergunta um?", "resposta", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn recorder_rejects_ineligible_submission() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        h.engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap();

        let err = h
            .engine
            .record_answer(user, "Pergunta dois?", "resposta", t0() + Duration::hours(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotEligible(_)));
        assert_eq!(h.store.responses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recorder_appends_and_advances_progress() {
        let h = harness("Como diria Carl Gustav Jung, a sombra guarda ouro.");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        let eight_days = t0() + Duration::days(8);
        let response = h
            .engine
            .record_answer(user, "Pergunta um?", "minha resposta", eight_days)
            .await
            .unwrap();

        assert_eq!(response.week_number, 2);
        assert_eq!(response.masters_cited, vec!["Carl Gustav Jung"]);
        assert_eq!(response.created_at, eight_days);

        let progress = h.engine.progress(user, eight_days).await.unwrap().unwrap();
        assert_eq!(progress.questions_answered_count, 1);
        assert_eq!(progress.last_question_date, Some(eight_days));
        assert_eq!(progress.start_date, t0());
    }

    #[tokio::test]
    async fn recorder_is_append_only_across_weeks() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        for week in 0..4 {
            let when = t0() + Duration::days(7 * week);
            h.engine
                .record_answer(user, &format!("Pergunta {week}?"), "resposta", when)
                .await
                .unwrap();
        }

        assert_eq!(h.store.responses.lock().unwrap().len(), 4);
        let progress = h
            .engine
            .progress(user, t0() + Duration::days(28))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.questions_answered_count, 4);
    }

    #[tokio::test]
    async fn generation_failure_writes_nothing() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();
        h.commentary.fail.store(true, Ordering::SeqCst);

        let err = h
            .engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::GenerationUnavailable(_)));

        assert!(h.store.responses.lock().unwrap().is_empty());
        let progress = h.engine.progress(user, t0()).await.unwrap().unwrap();
        assert_eq!(progress.questions_answered_count, 0);
    }

    #[tokio::test]
    async fn empty_commentary_is_a_generation_failure() {
        let h = harness("   ");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        let err = h
            .engine
            .record_answer(user, "Pergunta um?", "resposta", t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::GenerationUnavailable(_)));
        assert!(h.store.responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_count_is_rejected_by_the_store() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        // Simulate a racing tab: the stored count moved on after this
        // caller read its snapshot.
        let response = SombraResponse {
            id: Uuid::new_v4(),
            user_id: user,
            question_text: "Pergunta um?".to_string(),
            user_answer: "resposta".to_string(),
            ai_response: "texto".to_string(),
            masters_cited: vec![GENERAL_TEACHINGS.to_string()],
            created_at: t0(),
            week_number: 1,
        };
        let advance = ProgressAdvance {
            last_question_date: t0(),
            questions_answered_count: 1,
            current_phase: Phase::One,
        };
        h.store.append_response(&response, &advance, 0).await.unwrap();

        let err = h
            .store
            .append_response(&response, &advance, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn history_returns_newest_first_up_to_limit() {
        let h = harness("texto");
        let user = Uuid::new_v4();
        h.engine.initialize_progress(user, t0()).await.unwrap();

        for week in 0..3 {
            let when = t0() + Duration::days(7 * week);
            h.engine
                .record_answer(user, &format!("Pergunta {week}?"), "resposta", when)
                .await
                .unwrap();
        }

        let history = h.engine.history(user, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question_text, "Pergunta 2?");
        assert_eq!(history[1].question_text, "Pergunta 1?");
    }

    #[test]
    fn citation_extraction_matches_case_insensitively_in_roster_order() {
        let masters = small_catalog().masters;
        let cited = extract_cited_masters(
            "JOE DISPENZA e carl gustav jung apontam o mesmo padrão.",
            &masters,
        );
        assert_eq!(cited, vec!["Carl Gustav Jung", "Joe Dispenza"]);
    }

    #[test]
    fn citation_extraction_falls_back_to_general_teachings() {
        let masters = small_catalog().masters;
        let cited = extract_cited_masters("nenhum nome aparece aqui", &masters);
        assert_eq!(cited, vec![GENERAL_TEACHINGS.to_string()]);
    }
}
