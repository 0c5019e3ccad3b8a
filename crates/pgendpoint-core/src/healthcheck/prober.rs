//! PostgreSQL node prober

use std::sync::Arc;
use std::time::{Duration, Instant};

use pgendpoint_common::{
    DEFAULT_PG_PORT, EndpointManagerError, Node, ProbeOutcome, UnknownReason,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::NodeProber;
use super::checker::{Credentials, RecoveryChecker};
use super::retry::RetryPolicy;

/// Probe configuration
#[derive(Clone, Debug)]
pub struct ProbeSettings {
    /// Port used for both the reachability check and the query
    pub port: u16,
    /// Timeout of the raw TCP connect
    pub tcp_connect_timeout: Duration,
    /// Timeout of a single recovery query attempt
    pub query_timeout: Duration,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PG_PORT,
            tcp_connect_timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(5),
            credentials: Credentials::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Two-stage prober: TCP reachability, then `pg_is_in_recovery()`
pub struct PostgresProber {
    settings: ProbeSettings,
    checker: Arc<dyn RecoveryChecker>,
    span: Span,
}

impl PostgresProber {
    pub fn new(settings: ProbeSettings, checker: Arc<dyn RecoveryChecker>, parent: &Span) -> Self {
        let span = info_span!(parent: parent, "prober", port = settings.port);
        Self {
            settings,
            checker,
            span,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    async fn tcp_check(&self, host: &str) -> Result<(), String> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        match timeout(
            self.settings.tcp_connect_timeout,
            TcpStream::connect((host, self.settings.port)),
        )
        .await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("Connection failed: {}", e)),
            Err(_) => Err("Connection timeout".to_string()),
        }
    }

    async fn probe_node(&self, node: &Node) -> ProbeOutcome {
        let start = Instant::now();

        if let Err(reason) = self.tcp_check(&node.address).await {
            info!(
                status = "DOWN",
                connectivity_check = "failed",
                reason = %reason,
                "Node status determined"
            );
            return ProbeOutcome::Unknown(UnknownReason::Unreachable(reason));
        }

        let checker = &self.checker;
        let port = self.settings.port;
        let credentials = &self.settings.credentials;
        let result = self
            .settings
            .retry
            .retry_if(EndpointManagerError::is_transient, move |_| {
                checker.is_in_recovery(&node.address, port, credentials)
            })
            .await;

        let outcome = match result {
            Ok(in_recovery) => ProbeOutcome::from_recovery(in_recovery),
            Err(e) => {
                warn!(
                    recovery_check = "failed",
                    attempts = self.settings.retry.attempts.max(1),
                    error = %e,
                    "Node status unknown"
                );
                ProbeOutcome::Unknown(UnknownReason::QueryFailed(e.to_string()))
            }
        };

        match &outcome {
            ProbeOutcome::Unknown(UnknownReason::Indeterminate) => {
                warn!(status = outcome.as_str(), "Node status unknown");
            }
            ProbeOutcome::Unknown(_) => {}
            _ => info!(
                status = outcome.as_str(),
                response_time_ms = start.elapsed().as_millis() as u64,
                "Node status determined"
            ),
        }

        outcome
    }
}

#[async_trait::async_trait]
impl NodeProber for PostgresProber {
    async fn probe(&self, node: &Node) -> ProbeOutcome {
        let span = info_span!(
            parent: &self.span,
            "probe",
            node_ip = %node.address,
            node_name = %node.display_name
        );
        debug!(parent: &span, "Checking PostgreSQL node");
        self.probe_node(node).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgendpoint_common::Result;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    /// Checker replaying a scripted sequence of answers
    struct ScriptedChecker {
        answers: Mutex<VecDeque<Result<Option<bool>>>>,
        calls: AtomicU32,
    }

    impl ScriptedChecker {
        fn new(answers: Vec<Result<Option<bool>>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RecoveryChecker for ScriptedChecker {
        async fn is_in_recovery(
            &self,
            _host: &str,
            _port: u16,
            _credentials: &Credentials,
        ) -> Result<Option<bool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EndpointManagerError::Database("no answer".to_string())))
        }
    }

    fn settings(port: u16) -> ProbeSettings {
        ProbeSettings {
            port,
            tcp_connect_timeout: Duration::from_millis(500),
            query_timeout: Duration::from_secs(1),
            credentials: Credentials::default(),
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::from_millis(1),
            },
        }
    }

    async fn open_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn closed_port() -> u16 {
        let (listener, port) = open_port().await;
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_probe_primary() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![Ok(Some(false))]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert_eq!(outcome, ProbeOutcome::Primary);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_probe_standby() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![Ok(Some(true))]);
        let prober = PostgresProber::new(settings(port), checker, &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert_eq!(outcome, ProbeOutcome::Standby);
    }

    #[tokio::test]
    async fn test_unreachable_node_skips_query() {
        let port = closed_port().await;
        let checker = ScriptedChecker::new(vec![Ok(Some(false))]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unknown(UnknownReason::Unreachable(_))
        ));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_query_error_is_retried() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![
            Err(EndpointManagerError::Database("connection reset".to_string())),
            Ok(Some(true)),
        ]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert_eq!(outcome, ProbeOutcome::Standby);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_unknown() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unknown(UnknownReason::QueryFailed(_))
        ));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_address_is_not_retried() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![
            Err(EndpointManagerError::Config("invalid node address".to_string())),
            Ok(Some(true)),
        ]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Unknown(UnknownReason::QueryFailed(_))
        ));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_recovery_state_is_unknown() {
        let (_listener, port) = open_port().await;
        let checker = ScriptedChecker::new(vec![Ok(None)]);
        let prober = PostgresProber::new(settings(port), checker.clone(), &Span::none());

        let outcome = prober.probe(&Node::new("127.0.0.1")).await;
        assert_eq!(outcome, ProbeOutcome::Unknown(UnknownReason::Indeterminate));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }
}
