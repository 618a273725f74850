//! Iterative refinement of generated descriptions.
//!
//! A [`RefinementTracker`] takes ownership of a run's results, so a run and
//! refinements on its results can never be in flight at the same time.
//! Each refinement sends the template's instructions, the current text as an
//! assistant turn and the operator's instructions as a user turn; on success
//! the current text moves to the result's history and is replaced.
//!
//! History and open inputs are keyed by the identity each result carries,
//! its dispatch `index` paired with its `source_group_id`, not by where it
//! sits in the vector. Two results that share a group id still keep
//! separate histories.

use crate::catalog::{DocumentTypeKey, PromptCatalog};
use crate::error::DescriberError;
use crate::output::{AnalysisRun, GenerationResult};
use crate::pipeline::llm::GenerationBackend;
use crate::pipeline::postprocess::clean_completion;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Earlier versions of one result, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub result_index: usize,
    pub source_group_id: String,
    /// One entry per completed refinement.
    pub history: Vec<String>,
}

/// Owns a finished run's results and their revision histories.
#[derive(Debug, Clone)]
pub struct RefinementTracker {
    results: Vec<GenerationResult>,
    type_key: DocumentTypeKey,
    histories: HashMap<ResultKey, Vec<String>>,
    open_inputs: HashSet<ResultKey>,
}

type ResultKey = (usize, String);

fn key_of(result: &GenerationResult) -> ResultKey {
    (result.index, result.source_group_id.clone())
}

impl RefinementTracker {
    /// Track `results` that were generated with `type_key`'s template.
    pub fn new(results: Vec<GenerationResult>, type_key: DocumentTypeKey) -> Self {
        Self {
            results,
            type_key,
            histories: HashMap::new(),
            open_inputs: HashSet::new(),
        }
    }

    /// Take over the results of a run, complete or partial.
    pub fn from_run(run: AnalysisRun) -> Self {
        let type_key = run.type_key().clone();
        let (results, error) = run.into_parts();
        if let Some(e) = error {
            debug!("Refining partial results of a failed run: {}", e);
        }
        Self::new(results, type_key)
    }

    pub fn results(&self) -> &[GenerationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<GenerationResult> {
        self.results
    }

    pub fn type_key(&self) -> &DocumentTypeKey {
        &self.type_key
    }

    /// Mark result `index` as awaiting instructions.
    pub fn open_refinement(&mut self, index: usize) -> Result<(), DescriberError> {
        let key = key_of(self.result(index)?);
        self.open_inputs.insert(key);
        Ok(())
    }

    /// Discard an open input without refining.
    pub fn cancel_refinement(&mut self, index: usize) {
        if let Some(r) = self.results.get(index) {
            self.open_inputs.remove(&key_of(r));
        }
    }

    pub fn is_refinement_open(&self, index: usize) -> bool {
        self.results
            .get(index)
            .is_some_and(|r| self.open_inputs.contains(&key_of(r)))
    }

    /// Earlier versions of result `index`, oldest first.
    pub fn history(&self, index: usize) -> &[String] {
        self.results
            .get(index)
            .and_then(|r| self.histories.get(&key_of(r)))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Earlier versions of the first result for group `source_group_id`.
    pub fn history_for(&self, source_group_id: &str) -> &[String] {
        self.results
            .iter()
            .position(|r| r.source_group_id == source_group_id)
            .map(|i| self.history(i))
            .unwrap_or_default()
    }

    /// Revision entries for every result that has been refined, in result order.
    pub fn revisions(&self) -> Vec<RevisionEntry> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                self.histories.get(&key_of(r)).map(|h| RevisionEntry {
                    result_index: i,
                    source_group_id: r.source_group_id.clone(),
                    history: h.clone(),
                })
            })
            .collect()
    }

    /// Revise result `index` with free-text `instructions`.
    ///
    /// # Errors
    /// - `EmptyInstructions` / `NoSuchResult`: nothing is sent.
    /// - Any remote error, including an empty completion: the result and
    ///   its history are unchanged and an open input stays open.
    pub async fn refine<B: GenerationBackend>(
        &mut self,
        backend: &B,
        catalog: &PromptCatalog,
        index: usize,
        instructions: &str,
    ) -> Result<&GenerationResult, DescriberError> {
        if instructions.trim().is_empty() {
            return Err(DescriberError::EmptyInstructions { index });
        }
        let current = self.result(index)?;
        let request = catalog.build_refinement_request(&current.text, instructions, &self.type_key);
        let group_id = current.source_group_id.clone();
        info!("Refining result {} ({})", index, group_id);

        let completion = match backend.generate(&request).await {
            Ok(Some(text)) => clean_completion(&text),
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Refinement of {} failed: {}", group_id, e);
                return Err(e);
            }
        };
        if completion.is_empty() {
            warn!("Refinement of {} returned no content", group_id);
            return Err(DescriberError::EmptyCompletion { index });
        }

        let result = &mut self.results[index];
        let key = key_of(result);
        let previous = std::mem::replace(&mut result.text, completion);
        result.sentinel = false;
        self.open_inputs.remove(&key);
        let history = self.histories.entry(key).or_default();
        history.push(previous);
        debug!("{} now has {} revisions", group_id, history.len());

        Ok(&self.results[index])
    }

    fn result(&self, index: usize) -> Result<&GenerationResult, DescriberError> {
        self.results.get(index).ok_or(DescriberError::NoSuchResult {
            index,
            total: self.results.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{GenerationRequest, Role};
    use crate::error::ErrorKind;
    use std::sync::Mutex;

    type Reply = Result<Option<String>, DescriberError>;

    struct OneShot {
        reply: Mutex<Option<Reply>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl OneShot {
        fn new(reply: Reply) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl GenerationBackend for OneShot {
        async fn generate(&self, request: &GenerationRequest) -> Reply {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.lock().unwrap().take().unwrap_or(Ok(None))
        }
    }

    fn tracker() -> RefinementTracker {
        RefinementTracker::new(
            vec![
                GenerationResult::generated(0, "a.pdf#1", "First draft".into()),
                GenerationResult::generated(1, "a.pdf#2", "Second draft".into()),
            ],
            DocumentTypeKey::Mini,
        )
    }

    #[tokio::test]
    async fn refine_replaces_text_and_records_history() {
        let mut t = tracker();
        let backend = OneShot::new(Ok(Some("NEW".into())));
        t.open_refinement(1).unwrap();
        assert!(t.is_refinement_open(1));

        let refined = t
            .refine(&backend, &PromptCatalog::built_in(), 1, "Mention the warranty")
            .await
            .unwrap();
        assert_eq!(refined.text, "NEW");

        assert_eq!(t.history(1).last().map(String::as_str), Some("Second draft"));
        assert_eq!(t.results()[1].text, "NEW");
        assert!(!t.is_refinement_open(1));
        assert!(t.history(0).is_empty());

        let req = &backend.seen.lock().unwrap()[0];
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User]);
        assert_eq!(req.messages[1].content, "Second draft");
    }

    #[tokio::test]
    async fn history_accumulates_oldest_first() {
        let mut t = tracker();
        let catalog = PromptCatalog::built_in();
        for (reply, expected_len) in [("v2", 1), ("v3", 2)] {
            let backend = OneShot::new(Ok(Some(reply.into())));
            t.refine(&backend, &catalog, 0, "again").await.unwrap();
            assert_eq!(t.history(0).len(), expected_len);
        }
        assert_eq!(t.history_for("a.pdf#1"), ["First draft", "v2"]);
        assert_eq!(t.results()[0].text, "v3");

        let revisions = t.revisions();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].result_index, 0);
    }

    #[tokio::test]
    async fn empty_instructions_are_rejected_before_sending() {
        let mut t = tracker();
        let backend = OneShot::new(Ok(Some("unused".into())));
        let err = t
            .refine(&backend, &PromptCatalog::built_in(), 0, "   ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_index_is_validation_error() {
        let mut t = tracker();
        let backend = OneShot::new(Ok(Some("unused".into())));
        let err = t
            .refine(&backend, &PromptCatalog::built_in(), 7, "shorter")
            .await
            .unwrap_err();
        assert!(matches!(err, DescriberError::NoSuchResult { index: 7, total: 2 }));
        assert!(t.open_refinement(7).is_err());
    }

    #[tokio::test]
    async fn remote_failure_leaves_result_untouched() {
        let mut t = tracker();
        t.open_refinement(0).unwrap();
        let backend = OneShot::new(Err(DescriberError::RemoteStatus {
            status: 429,
            body: "rate limited".into(),
        }));
        let err = t
            .refine(&backend, &PromptCatalog::built_in(), 0, "shorter")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert_eq!(t.results()[0].text, "First draft");
        assert!(t.history(0).is_empty());
        assert!(t.is_refinement_open(0));
    }

    #[tokio::test]
    async fn empty_completion_is_remote_error() {
        let mut t = tracker();
        let backend = OneShot::new(Ok(None));
        let err = t
            .refine(&backend, &PromptCatalog::built_in(), 0, "shorter")
            .await
            .unwrap_err();
        assert!(matches!(err, DescriberError::EmptyCompletion { index: 0 }));
        assert_eq!(t.results()[0].text, "First draft");
    }

    #[tokio::test]
    async fn shared_group_id_keeps_separate_histories() {
        let mut t = RefinementTracker::new(
            vec![
                GenerationResult::generated(0, "invoices.pdf#1", "January car".into()),
                GenerationResult::generated(1, "invoices.pdf#1", "February car".into()),
            ],
            DocumentTypeKey::Mini,
        );
        t.open_refinement(1).unwrap();
        let backend = OneShot::new(Ok(Some("Shorter January car".into())));
        t.refine(&backend, &PromptCatalog::built_in(), 0, "shorter")
            .await
            .unwrap();

        assert_eq!(t.history(0), ["January car"]);
        assert!(t.history(1).is_empty());
        assert_eq!(t.results()[1].text, "February car");
        assert!(t.is_refinement_open(1));
        let revisions = t.revisions();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].result_index, 0);
    }

    #[test]
    fn cancel_closes_input() {
        let mut t = tracker();
        t.open_refinement(0).unwrap();
        t.cancel_refinement(0);
        assert!(!t.is_refinement_open(0));
    }
}
