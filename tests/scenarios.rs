//! Workflow Scenario Tests
//!
//! End-to-end runs over scripted ports, one per documented scenario.

mod common;

use std::sync::Arc;

use common::{Harness, ScriptedClassifier, StaticRetriever, Task};
use corrag::core::RunRequest;
use corrag::domain::{
    document::WEB_SEARCH_SOURCE, OutcomeLabel, RunOutcome, StepLabel, StreamFrame, WebSearchFlag,
    DONE_SENTINEL,
};
use tokio_test::assert_ok;

#[tokio::test]
async fn scenario_a_all_relevant_first_answer_accepted() {
    let harness = Harness::new(
        ScriptedClassifier::new()
            .route("knowledge_base")
            .relevance(&[true, true, true])
            .grounding(&[true])
            .answer(&[true]),
        StaticRetriever::new(&["Leave: 25 days", "Leave accrues monthly", "Carry over 5 days"]),
    );

    let report = assert_ok!(harness.workflow().ask("How much leave do I get?").await);

    assert_eq!(
        report.outcome,
        RunOutcome::Accepted {
            generation: "answer 1".to_string()
        }
    );
    assert_eq!(harness.generator.calls(), 1);
    assert_eq!(report.state.loop_step(), 1);
    assert_eq!(report.state.needs_web_search(), WebSearchFlag::No);
    assert_eq!(report.state.documents().len(), 3);
    assert_eq!(harness.search.calls(), 0);
}

#[tokio::test]
async fn scenario_b_one_irrelevant_document_adds_web_result() {
    let harness = Harness::new(
        ScriptedClassifier::new()
            .route("knowledge_base")
            .relevance(&[true, false]),
        StaticRetriever::new(&["Leave: 25 days", "Cafeteria menu"]),
    );

    let report = assert_ok!(harness.workflow().ask("How much leave do I get?").await);

    assert!(report.outcome.is_verified());
    assert_eq!(report.state.needs_web_search(), WebSearchFlag::Yes);
    assert_eq!(report.state.loop_step(), 1);
    assert_eq!(harness.search.calls(), 1);

    let documents = report.state.documents();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].content, "Leave: 25 days");
    assert_eq!(documents[1].source(), Some(WEB_SEARCH_SOURCE));
    assert_eq!(documents[1].content, "web result 1");
}

#[tokio::test]
async fn scenario_c_accepted_on_third_attempt() {
    let harness = Harness::new(
        ScriptedClassifier::new().grounding(&[false, false, true]),
        StaticRetriever::new(&["Leave: 25 days"]),
    );

    let report = assert_ok!(
        harness
            .workflow()
            .execute(
                RunRequest::new("How much leave?").with_max_retries(3),
                &corrag::EventSink::detached()
            )
            .await
    );

    assert_eq!(report.outcome.label(), OutcomeLabel::Accepted);
    assert_eq!(report.outcome.generation(), "answer 3");
    assert_eq!(report.state.loop_step(), 3);
    assert_eq!(harness.generator.calls(), 3);
    assert_eq!(harness.classifier.calls(Task::Answer), 1);
    assert_eq!(harness.search.calls(), 0);
}

#[tokio::test]
async fn scenario_d_never_grounded_exhausts_retries() {
    let harness = Harness::new(
        ScriptedClassifier::new().grounding(&[false; 10]),
        StaticRetriever::new(&["Leave: 25 days"]),
    );

    let report = assert_ok!(harness.workflow().ask("How much leave?").await);

    assert_eq!(
        report.outcome,
        RunOutcome::RetriesExhausted {
            generation: "answer 4".to_string()
        }
    );
    assert!(!report.outcome.is_verified());
    assert_eq!(report.state.loop_step(), 4);
    assert_eq!(harness.generator.calls(), 4);
    // The check after the 4th generation stops before asking the classifier
    assert_eq!(harness.classifier.calls(Task::Grounding), 3);
    assert_eq!(harness.classifier.calls(Task::Answer), 0);
}

#[tokio::test]
async fn scenario_e_unparsable_route_defaults_to_knowledge_base() {
    let harness = Harness::new(
        ScriptedClassifier::new().raw(Task::Route, "I would use the vector store, probably"),
        StaticRetriever::new(&["Leave: 25 days"]),
    );

    let report = assert_ok!(harness.workflow().ask("How much leave?").await);

    assert!(report.outcome.is_verified());
    assert_eq!(harness.retriever.calls(), 1);
    assert_eq!(harness.search.calls(), 0);
}

#[tokio::test]
async fn unknown_route_label_defaults_to_knowledge_base() {
    let harness = Harness::new(
        ScriptedClassifier::new().raw(Task::Route, r#"{"datasource": "carrier_pigeon"}"#),
        StaticRetriever::new(&["Leave: 25 days"]),
    );

    assert_ok!(harness.workflow().ask("How much leave?").await);
    assert_eq!(harness.retriever.calls(), 1);
}

#[tokio::test]
async fn streamed_events_follow_the_path_taken() {
    let harness = Harness::new(
        ScriptedClassifier::new()
            .route("knowledge_base")
            .relevance(&[true, false]),
        StaticRetriever::new(&["Leave: 25 days", "Cafeteria menu"]),
    );
    let workflow = Arc::new(harness.workflow());

    let mut handle = workflow.spawn(RunRequest::new("How much leave do I get?"));
    let mut frames = Vec::new();
    while let Some(frame) = handle.frames.recv().await {
        frames.push(frame);
    }
    assert_ok!(handle.task.await.unwrap());

    let steps: Vec<StepLabel> = frames
        .iter()
        .filter_map(|f| f.event().map(|e| e.step))
        .collect();
    assert_eq!(
        steps,
        vec![
            StepLabel::Routing,
            StepLabel::Retrieved,
            StepLabel::Graded,
            StepLabel::Searched,
            StepLabel::Generated,
            StepLabel::Final,
        ]
    );

    let events: Vec<_> = frames.iter().filter_map(StreamFrame::event).collect();
    assert!(events.iter().all(|e| e.run_id == handle.run_id));
    assert_eq!(events[0].transition.as_deref(), Some("knowledge_base"));
    assert_eq!(events[1].document_count, 2);
    assert_eq!(events[2].transition.as_deref(), Some("web_search"));
    assert_eq!(events[2].document_count, 1);
    assert_eq!(events[3].document_count, 2);
    assert_eq!(events[4].transition.as_deref(), Some("accepted"));
    assert_eq!(events[4].loop_step, 1);

    let last_event = events[5];
    assert_eq!(last_event.content, "answer 1");
    assert_eq!(last_event.outcome, Some(OutcomeLabel::Accepted));
    assert_eq!(last_event.verified, Some(true));

    assert!(matches!(frames.last(), Some(StreamFrame::Done)));
    let sse = frames.last().unwrap().to_sse().unwrap();
    assert_eq!(sse, format!("data: {}\n\n", DONE_SENTINEL));
    assert!(frames[0].to_sse().unwrap().starts_with("data: {"));
}

#[tokio::test]
async fn retries_exhausted_final_event_is_marked_unverified() {
    let harness = Harness::new(
        ScriptedClassifier::new().grounding(&[false; 10]),
        StaticRetriever::new(&["Leave: 25 days"]),
    );
    let workflow = Arc::new(harness.workflow());

    let mut handle = workflow.spawn(RunRequest::new("How much leave?").with_max_retries(1));
    let mut events = Vec::new();
    while let Some(frame) = handle.frames.recv().await {
        if let StreamFrame::Event(event) = frame {
            events.push(event);
        }
    }
    assert_ok!(handle.task.await.unwrap());

    let last = events.last().unwrap();
    assert_eq!(last.step, StepLabel::Final);
    assert_eq!(last.outcome, Some(OutcomeLabel::RetriesExhausted));
    assert_eq!(last.verified, Some(false));
    assert_eq!(last.content, "answer 2");

    let transitions: Vec<&str> = events
        .iter()
        .filter(|e| e.step == StepLabel::Generated)
        .filter_map(|e| e.transition.as_deref())
        .collect();
    assert_eq!(transitions, vec!["regenerate", "retries_exhausted"]);
}
