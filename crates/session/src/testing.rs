//! Testing utilities for the async session.
//!
//! [`mock_debuggee`] returns a [`DebuggeeClient`] that records every request
//! together with a responder, and a [`MockController`] that lets a test pick
//! those requests up and answer them in any order.

use std::collections::BTreeMap;

use eyre::WrapErr;
use futures::{FutureExt, future::BoxFuture};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Duration, timeout},
};

use crate::{
    async_session::DebuggeeClient,
    command::EvaluationOutcome,
    location::{Location, Source},
    protocol::{PauseNotification, RequestBody, ResponseBody},
    types::{Frame, FrameId, Scope, Value, Why},
};

/// How long [`MockController::expect_request`] waits by default
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A request the session sent, waiting for the test to answer it
#[derive(Debug)]
pub struct PendingCall {
    pub body: RequestBody,
    responder: oneshot::Sender<eyre::Result<ResponseBody>>,
}

impl PendingCall {
    pub fn respond(self, body: ResponseBody) {
        let _ = self.responder.send(Ok(body));
    }

    pub fn ack(self) {
        self.respond(ResponseBody::Ack);
    }

    pub fn fail(self, message: impl Into<String>) {
        let _ = self.responder.send(Err(eyre::eyre!(message.into())));
    }

    /// Answer an evaluate request with one outcome per input
    pub fn evaluated(self, outcomes: Vec<EvaluationOutcome>) {
        self.respond(ResponseBody::Evaluated(outcomes));
    }

    /// Answer a set breakpoint request, installing it at `actual_location`
    pub fn breakpoint_set(self, actual_location: Location) {
        self.respond(ResponseBody::BreakpointSet { actual_location });
    }
}

/// Client half of the mock: hand this to [`crate::AsyncSession::start`]
#[derive(Clone)]
pub struct MockDebuggee {
    calls: mpsc::UnboundedSender<PendingCall>,
}

/// Test half of the mock
pub struct MockController {
    calls: mpsc::UnboundedReceiver<PendingCall>,
}

pub fn mock_debuggee() -> (MockDebuggee, MockController) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MockDebuggee { calls: tx }, MockController { calls: rx })
}

impl DebuggeeClient for MockDebuggee {
    fn send(&self, request: RequestBody) -> BoxFuture<'static, eyre::Result<ResponseBody>> {
        let (tx, rx) = oneshot::channel();
        // record eagerly so requests are observed in issue order
        let recorded = self.calls.send(PendingCall {
            body: request,
            responder: tx,
        });
        async move {
            if recorded.is_err() {
                eyre::bail!("mock controller dropped");
            }
            rx.await.wrap_err("mock dropped the request without answering")?
        }
        .boxed()
    }
}

impl MockController {
    /// Wait for the next request the session sends
    pub async fn expect_request(&mut self) -> eyre::Result<PendingCall> {
        self.expect_request_within(DEFAULT_WAIT).await
    }

    pub async fn expect_request_within(&mut self, wait: Duration) -> eyre::Result<PendingCall> {
        timeout(wait, self.calls.recv())
            .await
            .wrap_err("timed out waiting for a request")?
            .ok_or_else(|| eyre::eyre!("session dropped the debuggee client"))
    }

    /// Wait for the next `count` requests, in the order they were sent
    pub async fn expect_requests(&mut self, count: usize) -> eyre::Result<Vec<PendingCall>> {
        let mut calls = Vec::with_capacity(count);
        for _ in 0..count {
            calls.push(self.expect_request().await?);
        }
        Ok(calls)
    }

    /// A request that has already been sent, without waiting
    pub fn try_next(&mut self) -> Option<PendingCall> {
        self.calls.try_recv().ok()
    }
}

pub fn source(id: &str) -> Source {
    Source::new(id, format!("http://localhost/{id}.js"))
}

/// A stack of frames `ids`, innermost first, all in source `s1`
pub fn frames(ids: &[&str]) -> Vec<Frame> {
    ids.iter()
        .enumerate()
        .map(|(depth, id)| {
            Frame::new(
                *id,
                format!("frame{depth}"),
                Location::new("s1", 10 + depth as u32),
            )
        })
        .collect()
}

/// A pause in `frame_ids` with `bindings` in scope of the top frame
pub fn paused(frame_ids: &[&str], bindings: &[(&str, Value)]) -> PauseNotification {
    let frames = frames(frame_ids);
    let scopes = frames
        .first()
        .map(|top| {
            let scope = Scope {
                name: top.display_name.clone(),
                bindings: bindings
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect(),
                parent: None,
            };
            BTreeMap::from([(top.id.clone(), scope)])
        })
        .unwrap_or_default();
    PauseNotification {
        why: Why::Interrupted,
        frames,
        selected_frame_id: None,
        scopes,
        loaded_objects: Vec::new(),
    }
}

/// Same as [`paused`] with an explicit selected frame
pub fn paused_at(frame_ids: &[&str], selected: &str) -> PauseNotification {
    PauseNotification {
        selected_frame_id: Some(FrameId::new(selected)),
        ..paused(frame_ids, &[])
    }
}
