//! Claims-based security: token put and renewal over the `$cbs` node.
//!
//! Tokens come from an injected [`TokenSource`] and are pushed to the peer
//! with a `put-token` management request. The auth state machine tracks the
//! outstanding put, schedules renewal inside the refresh window and treats
//! expiry as fatal.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use amqx_codec::{Message, Value};

use crate::connection::Connection;
use crate::error::{AmqpError, AuthFailure, Result};
use crate::event::Event;
use crate::mgmt::{ManagementLink, MgmtCompletion};

/// Node address the CBS links pair on.
pub const CBS_NODE: &str = "$cbs";
/// Token type for JSON web tokens.
pub const TOKEN_TYPE_JWT: &str = "jwt";
/// Token type for service bus SAS tokens.
pub const TOKEN_TYPE_SAS: &str = "servicebus.windows.net:sastoken";

const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// A bearer token with its expiry as seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: u64,
}

/// Supplies tokens for an audience. Signing and credential storage live
/// behind this seam; SAS computation is out of scope here.
pub trait TokenSource: Send {
    fn token(&mut self) -> Result<AccessToken>;

    fn token_type(&self) -> &str {
        TOKEN_TYPE_JWT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    /// A put-token request is outstanding.
    InProgress,
    Ok,
    /// Inside the refresh window; re-issue the token.
    RefreshRequired,
    /// The token's lifetime ran out. Fatal.
    Expired,
    /// The put request outlived the auth timeout. Retryable.
    Timeout,
    /// The peer rejected the token.
    Error,
    /// The exchange itself failed (malformed response, send failure).
    Failure,
}

pub struct CbsAuth {
    mgmt: ManagementLink,
    audience: String,
    source: Box<dyn TokenSource>,
    state: AuthState,
    auth_timeout: Duration,
    expires_on: u64,
    refresh_window: u64,
    pending_id: Option<u64>,
    rejection: Option<AuthFailure>,
}

impl CbsAuth {
    pub fn new(audience: impl Into<String>, source: Box<dyn TokenSource>, channel: u16) -> CbsAuth {
        CbsAuth {
            mgmt: ManagementLink::new(CBS_NODE, channel),
            audience: audience.into(),
            source,
            state: AuthState::Idle,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            expires_on: 0,
            refresh_window: 0,
            pending_id: None,
            rejection: None,
        }
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> CbsAuth {
        self.auth_timeout = timeout;
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.mgmt.is_ready()
    }

    /// Attach the `$cbs` request/response pair.
    pub fn attach(&mut self, conn: &mut Connection) -> Result<()> {
        self.mgmt.attach(conn)
    }

    /// Fetch a fresh token and put it to the peer. The refresh window is
    /// 10% of the lifetime remaining at put time, recomputed every put.
    pub fn update_token(
        &mut self,
        conn: &mut Connection,
        now_epoch: u64,
        now: Instant,
    ) -> Result<()> {
        let token = self.source.token()?;
        self.note_token(now_epoch, token.expires_on);
        let token_type = self.source.token_type().to_owned();

        let mut message = Message::from_value(Value::string(token.token));
        message.application_properties = Some(vec![
            (Value::string("name"), Value::string(self.audience.clone())),
            (
                Value::string("expiration"),
                Value::Timestamp(epoch_millis(token.expires_on)),
            ),
        ]);
        let id = self.mgmt.execute_operation(
            conn,
            message,
            "put-token",
            Some(&token_type),
            Some(now + self.auth_timeout),
        )?;
        debug!(audience = %self.audience, message_id = id, "put-token sent");
        self.pending_id = Some(id);
        self.state = AuthState::InProgress;
        self.rejection = None;
        Ok(())
    }

    fn note_token(&mut self, now_epoch: u64, expires_on: u64) {
        self.expires_on = expires_on;
        self.refresh_window = expires_on.saturating_sub(now_epoch) / 10;
    }

    fn complete(&mut self, completion: MgmtCompletion) {
        self.pending_id = None;
        match completion {
            MgmtCompletion::Response(response) if response.is_ok() => {
                debug!(audience = %self.audience, "token accepted");
                self.state = AuthState::Ok;
            }
            MgmtCompletion::Response(response) => {
                warn!(
                    audience = %self.audience,
                    status = response.status_code,
                    "token rejected"
                );
                self.rejection = Some(AuthFailure {
                    status_code: Some(response.status_code),
                    description: response.status_description,
                });
                self.state = AuthState::Error;
            }
            MgmtCompletion::Timeout => {
                warn!(audience = %self.audience, "put-token timed out");
                self.state = AuthState::Timeout;
            }
        }
    }

    /// Route a connection event through the CBS link. Returns true when
    /// the event belonged to this component.
    pub fn on_event(&mut self, event: &Event) -> bool {
        if !self.mgmt.owns_event(event) {
            return false;
        }
        if let Some((id, completion)) = self.mgmt.on_event(event) {
            if self.pending_id == Some(id) {
                self.complete(completion);
            } else {
                warn!(message_id = id, "completion for a superseded put");
            }
        }
        true
    }

    /// Expire an overdue put request.
    pub fn handle_timeouts(&mut self, now: Instant) {
        for (id, completion) in self.mgmt.handle_timeouts(now) {
            if self.pending_id == Some(id) {
                self.complete(completion);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.mgmt.next_deadline()
    }

    /// Evaluate the auth state against the clock. `Ok(RefreshRequired)`
    /// asks the caller to re-issue [`update_token`](Self::update_token);
    /// terminal states come back as errors.
    pub fn handle_token(&mut self, now_epoch: u64) -> Result<AuthState> {
        match self.state {
            AuthState::Ok | AuthState::RefreshRequired | AuthState::InProgress
                if self.expires_on > 0 && now_epoch >= self.expires_on =>
            {
                self.state = AuthState::Expired;
                Err(AmqpError::TokenExpired)
            }
            AuthState::Ok if now_epoch >= self.expires_on.saturating_sub(self.refresh_window) => {
                self.state = AuthState::RefreshRequired;
                Ok(AuthState::RefreshRequired)
            }
            AuthState::Expired => Err(AmqpError::TokenExpired),
            AuthState::Timeout => Err(AmqpError::Timeout),
            AuthState::Error | AuthState::Failure => {
                Err(AmqpError::Auth(self.rejection.clone().unwrap_or(
                    AuthFailure {
                        status_code: None,
                        description: Some("token exchange failed".into()),
                    },
                )))
            }
            state => Ok(state),
        }
    }
}

fn epoch_millis(epoch_secs: u64) -> i64 {
    i64::try_from(epoch_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Delivery;
    use amqx_codec::Properties;
    use bytes::Bytes;

    struct FixedToken {
        lifetime: u64,
        now: u64,
    }

    impl TokenSource for FixedToken {
        fn token(&mut self) -> Result<AccessToken> {
            Ok(AccessToken {
                token: "tok".into(),
                expires_on: self.now + self.lifetime,
            })
        }
    }

    fn auth_with_put(now_epoch: u64, lifetime: u64) -> CbsAuth {
        let mut auth = CbsAuth::new(
            "sb://ns/queue",
            Box::new(FixedToken {
                lifetime,
                now: now_epoch,
            }),
            0,
        );
        // Simulate update_token without a live connection: record the
        // token math and the outstanding put.
        auth.note_token(now_epoch, now_epoch + lifetime);
        auth.mgmt.test_handles(0, 1);
        auth.mgmt.test_pending(0, None);
        auth.pending_id = Some(0);
        auth.state = AuthState::InProgress;
        auth
    }

    fn put_response(message_id: u64, status: i32) -> Event {
        let mut message = Message::from_value(Value::Null);
        message.properties = Some(Properties {
            correlation_id: Some(Value::Ulong(message_id)),
            ..Properties::default()
        });
        message.application_properties = Some(vec![(
            Value::string("status-code"),
            Value::Int(status),
        )]);
        Event::Message {
            channel: 0,
            handle: 1,
            delivery: Delivery {
                delivery_id: 0,
                delivery_tag: Bytes::from_static(b"t"),
                message,
                settled: true,
            },
        }
    }

    #[test]
    fn refresh_window_is_tenth_of_lifetime() {
        let auth = auth_with_put(1_000, 270);
        assert_eq!(auth.refresh_window, 27);

        let auth = auth_with_put(1_000, 330);
        assert_eq!(auth.refresh_window, 33);
    }

    #[test]
    fn accepted_put_is_ok_until_refresh_window() {
        let mut auth = auth_with_put(1_000, 270);
        assert!(auth.on_event(&put_response(0, 200)));
        assert_eq!(auth.state(), AuthState::Ok);

        // Comfortably before expires_on - refresh_window = 1243.
        assert_eq!(auth.handle_token(1_100).unwrap(), AuthState::Ok);
        // At the window edge the state flips.
        assert_eq!(
            auth.handle_token(1_243).unwrap(),
            AuthState::RefreshRequired
        );
    }

    #[test]
    fn longer_token_is_still_ok_at_the_same_observation_point() {
        let mut auth = auth_with_put(1_000, 330);
        auth.on_event(&put_response(0, 200));
        // 1243 was refresh time for the 270 s token; the 330 s token
        // refreshes at 1330 - 33 = 1297.
        assert_eq!(auth.handle_token(1_243).unwrap(), AuthState::Ok);
        assert_eq!(
            auth.handle_token(1_297).unwrap(),
            AuthState::RefreshRequired
        );
    }

    #[test]
    fn expiry_is_fatal() {
        let mut auth = auth_with_put(1_000, 270);
        auth.on_event(&put_response(0, 200));
        assert_eq!(auth.handle_token(1_270).unwrap_err(), AmqpError::TokenExpired);
        assert_eq!(auth.state(), AuthState::Expired);
        // And stays fatal.
        assert_eq!(auth.handle_token(1_271).unwrap_err(), AmqpError::TokenExpired);
    }

    #[test]
    fn rejection_surfaces_status() {
        let mut auth = auth_with_put(1_000, 270);
        auth.on_event(&put_response(0, 412));
        assert_eq!(auth.state(), AuthState::Error);
        match auth.handle_token(1_001) {
            Err(AmqpError::Auth(failure)) => assert_eq!(failure.status_code, Some(412)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn put_timeout_is_retryable_and_purges_the_request() {
        let start = Instant::now();
        let mut auth = auth_with_put(1_000, 270);
        auth.mgmt.test_pending(0, Some(start + Duration::from_secs(10)));
        auth.handle_timeouts(start + Duration::from_secs(11));
        assert_eq!(auth.state(), AuthState::Timeout);
        assert_eq!(auth.mgmt.pending_len(), 0);
        assert_eq!(auth.handle_token(1_050).unwrap_err(), AmqpError::Timeout);
        // A late response for the purged put completes nothing.
        auth.on_event(&put_response(0, 200));
        assert_eq!(auth.state(), AuthState::Timeout);
    }
}
