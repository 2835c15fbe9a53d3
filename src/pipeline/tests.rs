use super::*;
use crate::credentials::{ClientCredential, GrantedToken};
use crate::mailbox::Header;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted mailbox: fixed hits, per-message latency and failures.
#[derive(Default)]
struct FakeMailbox {
    messages: Vec<MessageRef>,
    attachments: HashMap<String, Vec<AttachmentRef>>,
    latency_ms: HashMap<String, u64>,
    failing: HashSet<String>,
    unauthorized: HashSet<String>,
    search_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    completed_fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMailbox {
    fn with_messages(ids: &[&str]) -> Self {
        Self {
            messages: ids
                .iter()
                .map(|id| MessageRef {
                    id: id.to_string(),
                    snippet: format!("snippet {}", id),
                    headers: vec![Header {
                        name: "From".to_string(),
                        value: format!("Sender {} <{}@x.com>", id, id),
                    }],
                })
                .collect(),
            ..Default::default()
        }
    }

    fn latency(mut self, id: &str, ms: u64) -> Self {
        self.latency_ms.insert(id.to_string(), ms);
        self
    }

    fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn unauthorized(mut self, id: &str) -> Self {
        self.unauthorized.insert(id.to_string());
        self
    }

    fn attachment(mut self, id: &str, attachment_id: &str, filename: &str) -> Self {
        self.attachments
            .entry(id.to_string())
            .or_default()
            .push(AttachmentRef {
                attachment_id: attachment_id.to_string(),
                mime_type: "application/pdf".to_string(),
                filename: filename.to_string(),
            });
        self
    }
}

#[async_trait]
impl MailSearchClient for FakeMailbox {
    async fn search(&self, _client: &AuthorizedClient, _query: &str) -> MailResult<Vec<MessageRef>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages.clone())
    }

    async fn fetch_attachments(
        &self,
        _client: &AuthorizedClient,
        message_id: &str,
    ) -> MailResult<Vec<AttachmentRef>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.latency_ms.get(message_id).copied().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed_fetches.fetch_add(1, Ordering::SeqCst);

        if self.unauthorized.contains(message_id) {
            return Err(MailError::Unauthorized("token revoked".to_string()));
        }
        if self.failing.contains(message_id) {
            return Err(MailError::Provider(format!("backend error for {}", message_id)));
        }
        Ok(self.attachments.get(message_id).cloned().unwrap_or_default())
    }

    async fn fetch_attachment_bytes(
        &self,
        _client: &AuthorizedClient,
        _message_id: &str,
        _attachment_id: &str,
    ) -> MailResult<Vec<u8>> {
        Err(MailError::NotFound("not used".to_string()))
    }
}

fn authorized() -> AuthorizedClient {
    AuthorizedClient::new(
        ClientCredential {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:3000/oauth/callback".to_string(),
        },
        GrantedToken {
            access_token: "ya29.test".to_string(),
            refresh_token: None,
            expiry: None,
            scope: String::new(),
            token_type: None,
        },
    )
}

fn pipeline(mailbox: Arc<FakeMailbox>, policy: FailurePolicy) -> AggregationPipeline {
    AggregationPipeline::new(
        mailbox,
        &PipelineConfig {
            failure_policy: policy,
            ..PipelineConfig::default()
        },
    )
}

#[test]
fn test_parse_sender() {
    assert_eq!(
        parse_sender("Jane Doe <jane@x.com>"),
        ("Jane Doe".to_string(), "jane@x.com".to_string())
    );
    assert_eq!(
        parse_sender("noreply@x.com"),
        ("noreply@x.com".to_string(), String::new())
    );
    assert_eq!(
        parse_sender("<bare@x.com>"),
        (String::new(), "bare@x.com".to_string())
    );
    assert_eq!(
        parse_sender("  \"Acme, Inc.\"   < billing@acme.com >  "),
        ("\"Acme, Inc.\"".to_string(), "billing@acme.com".to_string())
    );
    assert_eq!(parse_sender(""), (String::new(), String::new()));
}

#[test]
fn test_download_path() {
    assert_eq!(
        download_path("m1", "a1", "report 2024.pdf"),
        "/download/m1/a1/report%202024.pdf"
    );
    assert_eq!(
        download_path("m1", "a1", "a/b?c&d.txt"),
        "/download/m1/a1/a%2Fb%3Fc%26d.txt"
    );
}

#[test]
fn test_failure_policy_from_str() {
    assert_eq!("all_or_nothing".parse::<FailurePolicy>(), Ok(FailurePolicy::AllOrNothing));
    assert_eq!("best_effort".parse::<FailurePolicy>(), Ok(FailurePolicy::BestEffort));
    assert_eq!("Best-Effort".parse::<FailurePolicy>(), Ok(FailurePolicy::BestEffort));
    assert!("sometimes".parse::<FailurePolicy>().is_err());
    assert_eq!(FailurePolicy::BestEffort.to_string(), "best_effort");
}

#[tokio::test]
async fn test_empty_query_rejected_before_search() {
    let mailbox = Arc::new(FakeMailbox::with_messages(&["m1"]));
    let pipeline = pipeline(mailbox.clone(), FailurePolicy::AllOrNothing);

    for query in ["", "   ", "\t\n"] {
        let err = pipeline.run(&authorized(), query).await.unwrap_err();
        assert!(matches!(err, MailError::InvalidArgument(_)));
    }
    assert_eq!(mailbox.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enriches_results() {
    let mailbox = Arc::new(
        FakeMailbox::with_messages(&["m1", "m2"])
            .attachment("m1", "a1", "report 2024.pdf")
            .attachment("m1", "a2", "summary.pdf"),
    );
    let results = pipeline(mailbox, FailurePolicy::AllOrNothing)
        .run(&authorized(), "invoice")
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let first = &results[0];
    assert_eq!(first.id, "m1");
    assert_eq!(first.snippet, "snippet m1");
    assert_eq!(first.sender_name, "Sender m1");
    assert_eq!(first.sender_email, "m1@x.com");
    assert_eq!(
        first.download_descriptors,
        vec![
            DownloadDescriptor {
                mime_type: "application/pdf".to_string(),
                filename: "report 2024.pdf".to_string(),
                path: "/download/m1/a1/report%202024.pdf".to_string(),
            },
            DownloadDescriptor {
                mime_type: "application/pdf".to_string(),
                filename: "summary.pdf".to_string(),
                path: "/download/m1/a2/summary.pdf".to_string(),
            },
        ]
    );
    assert!(results[1].download_descriptors.is_empty());
    assert!(results.iter().all(|r| r.error.is_none()));
}

#[tokio::test]
async fn test_no_hits_is_empty_result() {
    let mailbox = Arc::new(FakeMailbox::default());
    let results = pipeline(mailbox.clone(), FailurePolicy::AllOrNothing)
        .run(&authorized(), "nothing matches")
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(mailbox.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_order_follows_search_for_every_latency_permutation() {
    let permutations: [[u64; 3]; 6] = [
        [5, 20, 40],
        [5, 40, 20],
        [20, 5, 40],
        [20, 40, 5],
        [40, 5, 20],
        [40, 20, 5],
    ];

    for latencies in permutations {
        let mailbox = Arc::new(
            FakeMailbox::with_messages(&["m1", "m2", "m3"])
                .latency("m1", latencies[0])
                .latency("m2", latencies[1])
                .latency("m3", latencies[2]),
        );
        let results = pipeline(mailbox, FailurePolicy::AllOrNothing)
            .run(&authorized(), "q")
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"], "latencies {:?}", latencies);
    }
}

#[tokio::test]
async fn test_single_failure_fails_whole_run() {
    let mailbox = Arc::new(FakeMailbox::with_messages(&["m1", "m2", "m3"]).failing("m2"));
    let err = pipeline(mailbox, FailurePolicy::AllOrNothing)
        .run(&authorized(), "q")
        .await
        .unwrap_err();

    match &err {
        MailError::AttachmentFetch { message_id, source } => {
            assert_eq!(message_id, "m2");
            assert!(matches!(**source, MailError::Provider(_)));
        }
        other => panic!("expected AttachmentFetch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failure_cancels_pending_lookups() {
    let mailbox = Arc::new(
        FakeMailbox::with_messages(&["m1", "m2", "m3"])
            .latency("m1", 800)
            .failing("m2")
            .latency("m3", 300),
    );
    let pipeline = pipeline(mailbox.clone(), FailurePolicy::AllOrNothing);

    let started = std::time::Instant::now();
    let err = pipeline.run(&authorized(), "q").await.unwrap_err();
    let elapsed = started.elapsed();

    match &err {
        MailError::AttachmentFetch { message_id, .. } => assert_eq!(message_id, "m2"),
        other => panic!("expected AttachmentFetch, got {other:?}"),
    }
    assert!(elapsed < Duration::from_millis(250), "failure took {:?}", elapsed);
    assert_eq!(mailbox.fetch_calls.load(Ordering::SeqCst), 3);

    // Dropped lookups never finish, even after their latency has passed
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mailbox.completed_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_best_effort_keeps_failed_slot() {
    let mailbox = Arc::new(
        FakeMailbox::with_messages(&["m1", "m2", "m3"])
            .failing("m2")
            .attachment("m3", "a9", "x.pdf"),
    );
    let results = pipeline(mailbox, FailurePolicy::BestEffort)
        .run(&authorized(), "q")
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert!(results[1].error.as_deref().unwrap_or("").contains("m2"));
    assert!(results[1].download_descriptors.is_empty());
    assert_eq!(results[1].sender_email, "m2@x.com");
    assert_eq!(results[2].download_descriptors.len(), 1);
    assert!(results[2].error.is_none());
}

#[tokio::test]
async fn test_unauthorized_surfaces_under_both_policies() {
    for policy in [FailurePolicy::AllOrNothing, FailurePolicy::BestEffort] {
        let mailbox = Arc::new(FakeMailbox::with_messages(&["m1", "m2"]).unauthorized("m2"));
        let err = pipeline(mailbox, policy)
            .run(&authorized(), "q")
            .await
            .unwrap_err();
        assert!(err.is_unauthorized(), "policy {policy}");
    }
}

#[tokio::test]
async fn test_fan_out_is_bounded() {
    let ids: Vec<String> = (0..12).map(|i| format!("m{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut mailbox = FakeMailbox::with_messages(&id_refs);
    for id in &ids {
        mailbox = mailbox.latency(id, 10);
    }
    let mailbox = Arc::new(mailbox);

    let pipeline = AggregationPipeline::new(
        mailbox.clone(),
        &PipelineConfig {
            max_concurrent_fetches: 3,
            ..PipelineConfig::default()
        },
    );
    let results = pipeline.run(&authorized(), "q").await.unwrap();

    assert_eq!(results.len(), 12);
    assert_eq!(mailbox.fetch_calls.load(Ordering::SeqCst), 12);
    let peak = mailbox.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {}", peak);
    assert!(peak > 1, "lookups never overlapped");
}

#[test]
fn test_enriched_result_serialization_omits_missing_error() {
    let result = EnrichedResult {
        id: "m1".to_string(),
        snippet: String::new(),
        sender_name: "Jane".to_string(),
        sender_email: "jane@x.com".to_string(),
        download_descriptors: Vec::new(),
        error: None,
    };
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["senderEmail"], "jane@x.com");
    assert!(json.get("error").is_none());
}
