use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::platform::Invocation;
use crate::quote::{FetchError, Quote, QuoteSource};

pub const DENIED_MESSAGE: &str = "Sorry, you don't have the required role to use this command.";
pub const CONNECTION_ERROR_MESSAGE: &str = "An error occurred while trying to connect to the API.";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Platform-neutral rendering of a successful API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteEmbed {
    pub title: String,
    pub description: String,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
    pub footer: String,
}

impl QuoteEmbed {
    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            title: "API Call Successful!".to_string(),
            description: "Here is a random quote from the API:".to_string(),
            colour: 0x2ecc71,
            fields: vec![
                EmbedField {
                    name: "Quote".to_string(),
                    value: format!("_{}_", quote.content),
                    inline: false,
                },
                EmbedField {
                    name: "Author".to_string(),
                    value: format!("- {}", quote.author),
                    inline: false,
                },
            ],
            footer: "Powered by Quotable API".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Embed(QuoteEmbed),
    Text(String),
}

/// Ways the handler talks back to the invoking user.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Immediate reply visible only to the invoking user.
    async fn deny(&self, text: &str) -> Result<()>;
    /// Acknowledge now, reply later.
    async fn defer(&self) -> Result<()>;
    /// The delayed reply.
    async fn follow_up(&self, reply: Reply) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Denied,
    Quoted,
    ApiStatus(u16),
    ConnectionFailed,
    Unexpected,
}

/// The `/callapi` command: role check, then one call to the quote API.
pub struct CallApiCommand {
    allowed_role_ids: BTreeSet<u64>,
    source: Arc<dyn QuoteSource>,
}

impl CallApiCommand {
    pub fn new(allowed_role_ids: BTreeSet<u64>, source: Arc<dyn QuoteSource>) -> Self {
        Self {
            allowed_role_ids,
            source,
        }
    }

    pub fn is_authorized(&self, invocation: &Invocation) -> bool {
        invocation
            .role_ids
            .iter()
            .any(|id| self.allowed_role_ids.contains(id))
    }

    /// Handle one invocation. Sends exactly one user-visible reply; only
    /// failures of the responder itself are returned as errors.
    pub async fn handle(&self, invocation: &Invocation, responder: &dyn Responder) -> Result<Outcome> {
        if !self.is_authorized(invocation) {
            responder.deny(DENIED_MESSAGE).await?;
            info!(
                "Denied access to {} (ID: {}) for /callapi command (missing role)",
                invocation.user_name, invocation.user_id
            );
            return Ok(Outcome::Denied);
        }

        info!(
            "User {} (ID: {}) has permission. Proceeding with API call",
            invocation.user_name, invocation.user_id
        );
        responder.defer().await?;

        let (reply, outcome) = match self.source.fetch().await {
            Ok(quote) => (Reply::Embed(QuoteEmbed::from_quote(&quote)), Outcome::Quoted),
            Err(FetchError::Status(code)) => {
                warn!("Quote API returned status {}", code);
                (
                    Reply::Text(format!(
                        "Error: The API returned a status code of `{code}`."
                    )),
                    Outcome::ApiStatus(code),
                )
            }
            Err(e @ (FetchError::Connection(_) | FetchError::ContentType(_))) => {
                error!("An error occurred during the API call: {}", e);
                (
                    Reply::Text(CONNECTION_ERROR_MESSAGE.to_string()),
                    Outcome::ConnectionFailed,
                )
            }
            Err(FetchError::Unexpected(e)) => {
                error!("An unexpected error occurred: {}", e);
                (
                    Reply::Text(UNEXPECTED_ERROR_MESSAGE.to_string()),
                    Outcome::Unexpected,
                )
            }
        };

        responder.follow_up(reply).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Denied(String),
        Deferred,
        FollowUp(Reply),
    }

    #[derive(Default)]
    struct RecordingResponder {
        sent: Mutex<Vec<Sent>>,
    }

    impl RecordingResponder {
        async fn sent(&self) -> Vec<Sent> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn deny(&self, text: &str) -> Result<()> {
            self.sent.lock().await.push(Sent::Denied(text.to_string()));
            Ok(())
        }

        async fn defer(&self) -> Result<()> {
            self.sent.lock().await.push(Sent::Deferred);
            Ok(())
        }

        async fn follow_up(&self, reply: Reply) -> Result<()> {
            self.sent.lock().await.push(Sent::FollowUp(reply));
            Ok(())
        }
    }

    enum Canned {
        Quote(&'static str, &'static str),
        Status(u16),
        Connection,
        NotJson,
        Unexpected,
    }

    struct FakeSource {
        canned: Canned,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(canned: Canned) -> Arc<Self> {
            Arc::new(Self {
                canned,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuoteSource for FakeSource {
        async fn fetch(&self) -> Result<Quote, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.canned {
                Canned::Quote(content, author) => Ok(Quote {
                    content: content.to_string(),
                    author: author.to_string(),
                }),
                Canned::Status(code) => Err(FetchError::Status(*code)),
                Canned::Connection => {
                    // A real reqwest error, from a URL it refuses to build.
                    let err = reqwest::Client::new()
                        .get("http://[::1")
                        .build()
                        .unwrap_err();
                    Err(FetchError::Connection(err))
                }
                Canned::NotJson => Err(FetchError::ContentType("text/html".to_string())),
                Canned::Unexpected => Err(FetchError::Unexpected("boom".to_string())),
            }
        }
    }

    fn invocation(roles: &[u64]) -> Invocation {
        Invocation {
            user_id: 42,
            user_name: "alice".to_string(),
            role_ids: roles.iter().copied().collect(),
        }
    }

    fn command(source: Arc<FakeSource>) -> CallApiCommand {
        CallApiCommand::new(BTreeSet::from([100, 200]), source)
    }

    fn follow_up_text(sent: &[Sent]) -> String {
        match sent.last() {
            Some(Sent::FollowUp(Reply::Text(text))) => text.clone(),
            other => panic!("expected text follow-up, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denied_without_matching_role() {
        let source = FakeSource::new(Canned::Quote("Hi", "Bob"));
        let responder = RecordingResponder::default();

        let outcome = command(source.clone())
            .handle(&invocation(&[1, 2, 3]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Denied);
        assert_eq!(
            responder.sent().await,
            vec![Sent::Denied(DENIED_MESSAGE.to_string())]
        );
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_denied_with_no_roles() {
        let source = FakeSource::new(Canned::Quote("Hi", "Bob"));
        let responder = RecordingResponder::default();

        let outcome = command(source.clone())
            .handle(&invocation(&[]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Denied);
        assert_eq!(responder.sent().await.len(), 1);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_authorized_calls_api_once_and_replies_with_embed() {
        let source = FakeSource::new(Canned::Quote("Hi", "Bob"));
        let responder = RecordingResponder::default();

        let outcome = command(source.clone())
            .handle(&invocation(&[7, 200]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Quoted);
        assert_eq!(source.calls(), 1);

        let sent = responder.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Sent::Deferred);
        match &sent[1] {
            Sent::FollowUp(Reply::Embed(embed)) => {
                assert_eq!(embed.fields[0].value, "_Hi_");
                assert_eq!(embed.fields[1].value, "- Bob");
            }
            other => panic!("expected embed follow-up, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholder_quote_is_rendered() {
        let quote: Quote = serde_json::from_str("{}").unwrap();
        let embed = QuoteEmbed::from_quote(&quote);
        assert_eq!(embed.fields[0].value, "_N/A_");
        assert_eq!(embed.fields[1].value, "- Unknown");
    }

    #[test]
    fn test_embed_layout() {
        let embed = QuoteEmbed::from_quote(&Quote {
            content: "Hi".to_string(),
            author: "Bob".to_string(),
        });
        assert_eq!(embed.title, "API Call Successful!");
        assert_eq!(embed.description, "Here is a random quote from the API:");
        assert_eq!(embed.footer, "Powered by Quotable API");
        assert_eq!(embed.fields[0].name, "Quote");
        assert_eq!(embed.fields[1].name, "Author");
        assert!(embed.fields.iter().all(|f| !f.inline));
    }

    #[tokio::test]
    async fn test_status_error_reports_code() {
        let source = FakeSource::new(Canned::Status(500));
        let responder = RecordingResponder::default();

        let outcome = command(source.clone())
            .handle(&invocation(&[100]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::ApiStatus(500));
        assert_eq!(source.calls(), 1);
        let text = follow_up_text(&responder.sent().await);
        assert!(text.contains("500"));
        assert_eq!(text, "Error: The API returned a status code of `500`.");
    }

    #[tokio::test]
    async fn test_connection_error_then_next_invocation_still_served() {
        let responder = RecordingResponder::default();
        let outcome = command(FakeSource::new(Canned::Connection))
            .handle(&invocation(&[100]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::ConnectionFailed);
        assert_eq!(follow_up_text(&responder.sent().await), CONNECTION_ERROR_MESSAGE);

        let responder = RecordingResponder::default();
        let outcome = command(FakeSource::new(Canned::Quote("Hi", "Bob")))
            .handle(&invocation(&[100]), &responder)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Quoted);
    }

    #[tokio::test]
    async fn test_non_json_response_reports_connection_error() {
        let source = FakeSource::new(Canned::NotJson);
        let responder = RecordingResponder::default();
        let outcome = command(source.clone())
            .handle(&invocation(&[100]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::ConnectionFailed);
        assert_eq!(source.calls(), 1);
        assert_eq!(follow_up_text(&responder.sent().await), CONNECTION_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_unexpected_error_is_swallowed() {
        let responder = RecordingResponder::default();
        let outcome = command(FakeSource::new(Canned::Unexpected))
            .handle(&invocation(&[200]), &responder)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Unexpected);
        assert_eq!(follow_up_text(&responder.sent().await), UNEXPECTED_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_responder_failure_is_returned() {
        struct BrokenResponder;

        #[async_trait]
        impl Responder for BrokenResponder {
            async fn deny(&self, _text: &str) -> Result<()> {
                anyhow::bail!("discord down")
            }
            async fn defer(&self) -> Result<()> {
                anyhow::bail!("discord down")
            }
            async fn follow_up(&self, _reply: Reply) -> Result<()> {
                anyhow::bail!("discord down")
            }
        }

        let source = FakeSource::new(Canned::Quote("Hi", "Bob"));
        let result = command(source.clone())
            .handle(&invocation(&[100]), &BrokenResponder)
            .await;

        assert!(result.is_err());
        assert_eq!(source.calls(), 0);
    }
}
