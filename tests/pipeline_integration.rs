//! End-to-end tests for mailbox watcher → parser → extractor → pipeline.
//!
//! The mailbox, model, and mail transport are in-process fakes; parsing,
//! extraction, and the pipeline run for real.

mod common;

use std::sync::Arc;

use common::{
    RecordingLlm, RecordingMailer, ScriptedTransport, email_with_attachments, language_model,
    single_line_pdf, text_email,
};
use inbox_assist::channels::{Attachment, MailboxWatcher, ParsedMessage, PollReport};
use inbox_assist::error::{MailboxError, PipelineError};
use inbox_assist::pipeline::{DEFAULT_SIGNATURE, ResponsePipeline};
use inbox_assist::store::{MemoryStore, User};

const ALICE: &str = "alice@example.com";

struct Harness {
    store: Arc<MemoryStore>,
    llm: Arc<RecordingLlm>,
    mailer: Arc<RecordingMailer>,
    pipeline: Arc<ResponsePipeline>,
}

fn harness(reply: &str) -> Harness {
    let store = Arc::new(MemoryStore::with_users([User::new("42", ALICE)]));
    let llm = RecordingLlm::new(reply);
    let mailer = RecordingMailer::new();
    let pipeline = Arc::new(ResponsePipeline::new(
        store.clone(),
        language_model(llm.clone(), store.clone()),
        mailer.clone(),
    ));
    Harness {
        store,
        llm,
        mailer,
        pipeline,
    }
}

fn watcher(h: &Harness, raw: Vec<Vec<u8>>) -> MailboxWatcher {
    MailboxWatcher::new(ScriptedTransport::new(raw), h.pipeline.clone())
}

#[tokio::test]
async fn q1_sales_pdf_is_answered() {
    let h = harness("Revenue was $10,000 in Q1.");
    let pdf = single_line_pdf("Revenue: $10,000");
    let raw = email_with_attachments(
        ALICE,
        "Q1 sales",
        "Can you summarize the attached?",
        &[("application/pdf", "q1.pdf", &pdf)],
    );

    let report = watcher(&h, vec![raw]).poll_once().await.unwrap();
    assert_eq!(
        report,
        PollReport {
            fetched: 1,
            replied: 1,
            dropped: 0
        }
    );

    let prompts = h.llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Q1 sales\n"));
    assert!(prompts[0].contains("Can you summarize the attached?"));
    assert!(prompts[0].contains("Revenue"));
    assert!(prompts[0].contains("10,000"));

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ALICE);
    assert_eq!(sent[0].subject, "RE: Q1 sales");
    assert_eq!(
        sent[0].body,
        format!("Revenue was $10,000 in Q1.{DEFAULT_SIGNATURE}")
    );

    let calls = h.store.llm_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, "42");
    assert_eq!(calls[0].purpose, "email_reply");
}

#[tokio::test]
async fn extracted_text_keeps_body_and_attachment_order() {
    let h = harness("ok");
    let message = ParsedMessage {
        sender: ALICE.into(),
        subject: "Q1 sales".into(),
        body_text: "Body first.".into(),
        attachments: vec![
            Attachment {
                content_type: "application/pdf".into(),
                filename: Some("q1.pdf".into()),
                bytes: single_line_pdf("Revenue: $10,000"),
            },
            Attachment {
                content_type: "image/png".into(),
                filename: Some("logo.png".into()),
                bytes: b"\x89PNG\r\n".to_vec(),
            },
            Attachment {
                content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
                filename: Some("broken.docx".into()),
                bytes: b"not a zip at all".to_vec(),
            },
            Attachment {
                content_type: "text/plain".into(),
                filename: Some("notes.txt".into()),
                bytes: b"Notes last.".to_vec(),
            },
        ],
    };

    let text = h.pipeline.extracted_text(&message).await;
    assert!(text.starts_with("Body first.\n\n"));
    let revenue = text.find("Revenue").unwrap();
    let notes = text.find("Notes last.").unwrap();
    assert!(revenue < notes);
    assert!(text.ends_with("\n\nNotes last."));
    assert!(!text.contains("PNG"));
}

#[tokio::test]
async fn unknown_sender_gets_nothing() {
    let h = harness("should not be used");
    let raw = text_email("stranger@example.org", "hello", "who are you?");

    let report = watcher(&h, vec![raw]).poll_once().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.dropped, 1);
    assert!(h.llm.prompts().is_empty());
    assert!(h.mailer.sent().is_empty());
    assert!(h.store.llm_calls().await.is_empty());
}

#[tokio::test]
async fn unknown_sender_error_from_handle() {
    let h = harness("unused");
    let message = ParsedMessage {
        sender: "nobody@example.org".into(),
        subject: "s".into(),
        body_text: "b".into(),
        attachments: vec![],
    };
    let err = h.pipeline.handle(message).await.unwrap_err();
    assert!(matches!(err, PipelineError::UserNotFound { ref email } if email == "nobody@example.org"));
}

#[tokio::test]
async fn one_bad_message_does_not_block_the_batch() {
    let h = harness("Answer");
    let batch = vec![
        text_email(ALICE, "first", "one"),
        Vec::new(),
        text_email(ALICE, "third", "three"),
        b"Subject: no sender here\r\n\r\nbody\r\n".to_vec(),
        text_email(ALICE, "fifth", "five"),
    ];

    let report = watcher(&h, batch).poll_once().await.unwrap();
    assert_eq!(
        report,
        PollReport {
            fetched: 5,
            replied: 3,
            dropped: 2
        }
    );

    let mut subjects: Vec<String> = h.mailer.sent().into_iter().map(|m| m.subject).collect();
    subjects.sort();
    assert_eq!(subjects, vec!["RE: fifth", "RE: first", "RE: third"]);
}

#[tokio::test]
async fn empty_model_response_sends_no_reply_but_is_charged() {
    let h = harness("   ");
    let raw = text_email(ALICE, "question", "anything?");

    let report = watcher(&h, vec![raw]).poll_once().await.unwrap();
    assert_eq!(report.replied, 0);
    assert_eq!(report.dropped, 1);
    assert!(h.mailer.sent().is_empty());
    assert_eq!(h.store.llm_calls().await.len(), 1);
}

#[tokio::test]
async fn fetch_failure_still_finishes_dispatched_messages() {
    let h = harness("Answer");
    let batch = vec![
        text_email(ALICE, "first", "one"),
        text_email(ALICE, "second", "two"),
        text_email(ALICE, "never fetched", "three"),
    ];
    let transport = ScriptedTransport::failing_after(batch, 2);
    let watcher = MailboxWatcher::new(transport, h.pipeline.clone());

    let err = watcher.poll_once().await.unwrap_err();
    assert!(matches!(err, MailboxError::Fetch { uid: 3, .. }));

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.subject != "RE: never fetched"));
}

#[tokio::test]
async fn empty_mailbox() {
    let h = harness("unused");
    let report = watcher(&h, Vec::new()).poll_once().await.unwrap();
    assert_eq!(report, PollReport::default());
}

#[tokio::test]
async fn custom_signature() {
    let store = Arc::new(MemoryStore::with_users([User::new("42", ALICE)]));
    let llm = RecordingLlm::new("Hi");
    let mailer = RecordingMailer::new();
    let pipeline = ResponsePipeline::new(
        store.clone(),
        language_model(llm, store.clone()),
        mailer.clone(),
    )
    .with_signature("\n-- bot");

    let message = inbox_assist::channels::parse_message(&text_email(ALICE, "s", "b")).unwrap();
    pipeline.handle(message).await.unwrap();
    assert_eq!(mailer.sent()[0].body, "Hi\n-- bot");
}
