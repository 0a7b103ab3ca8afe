use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use config::SessionConfig;

use crate::{
    async_event::EventReceiver,
    breakpoints::Breakpoint,
    command::{BreakpointCommand, CommandEnvelope, EvaluationOutcome},
    error::Rejection,
    location::{Location, SourceId},
    pause::{StepKind, StepOutcome},
    protocol::{Notification, Request, RequestBody, RequestId, ResponseBody},
    session::Session,
    state::{Event, SessionView},
    symbols::SymbolDeclarations,
    types::{FrameId, Value},
};

/// Connection to the debuggee.
///
/// `send` is called in the order requests are issued; the returned future
/// resolves with the debuggee's answer.
pub trait DebuggeeClient: Send + Sync + 'static {
    fn send(&self, request: RequestBody) -> BoxFuture<'static, eyre::Result<ResponseBody>>;
}

type Reply = Box<dyn FnOnce() + Send>;
type Job = Box<dyn FnOnce(&mut Session) -> Reply + Send>;

enum Input {
    Run(Job),
    Notification(Notification),
    Response {
        id: RequestId,
        outcome: eyre::Result<ResponseBody>,
    },
}

/// Everything the processor task needs besides the session itself
struct Processor {
    client: Arc<dyn DebuggeeClient>,
    input_tx: mpsc::UnboundedSender<Input>,
    event_tx: mpsc::Sender<Event>,
    view_tx: watch::Sender<Arc<SessionView>>,
    request_timeout: Duration,
}

impl Processor {
    fn handle(&self, session: &mut Session, input: Input) {
        match input {
            Input::Run(job) => {
                let reply = job(session);
                self.flush(session);
                reply();
            }
            Input::Notification(notification) => {
                session.handle_notification(notification);
                self.flush(session);
            }
            Input::Response { id, outcome } => {
                session.handle_response(id, outcome);
                self.flush(session);
            }
        }
    }

    /// Forward queued requests, publish events, then the new view
    fn flush(&self, session: &mut Session) {
        for request in session.take_requests() {
            self.forward(request);
        }
        for event in session.take_events() {
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    tracing::warn!(?event, "event subscriber is lagging, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        self.view_tx.send_replace(Arc::new(session.view()));
    }

    fn forward(&self, Request { id, body }: Request) {
        tracing::debug!(request_id = %id, command = body.name(), "sending request");
        let response = self.client.send(body);
        let input_tx = self.input_tx.clone();
        let request_timeout = self.request_timeout;
        tokio::spawn(
            async move {
                let outcome = match tokio::time::timeout(request_timeout, response).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(eyre::eyre!(
                        "no response within {}ms",
                        request_timeout.as_millis()
                    )),
                };
                if input_tx.send(Input::Response { id, outcome }).is_err() {
                    tracing::debug!(request_id = %id, "session closed before response arrived");
                }
            }
            .in_current_span(),
        );
    }
}

/// A [`Session`] driven by a background task.
///
/// Commands, notifications and responses are applied one at a time in the
/// order they reach the task. After each one, requests are sent to the
/// [`DebuggeeClient`], events are published and a fresh [`SessionView`] is
/// made visible to readers.
pub struct AsyncSession {
    id: Uuid,
    input_tx: mpsc::UnboundedSender<Input>,
    event_rx: EventReceiver,
    view_rx: watch::Receiver<Arc<SessionView>>,
    cancel_token: CancellationToken,

    processor_handle: Option<JoinHandle<()>>,
}

impl AsyncSession {
    /// Start processing on the current tokio runtime
    pub fn start(client: impl DebuggeeClient, config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let session = Session::new(config.clone());
        let (view_tx, view_rx) = watch::channel(Arc::new(session.view()));
        let cancel_token = CancellationToken::new();

        let processor = Processor {
            client: Arc::new(client),
            input_tx: input_tx.clone(),
            event_tx,
            view_tx,
            request_timeout: config.request_timeout(),
        };
        let processor_handle =
            Self::spawn_processor_task(id, session, processor, input_rx, cancel_token.clone());

        Self {
            id,
            input_tx,
            event_rx: EventReceiver::new(event_rx),
            view_rx,
            cancel_token,
            processor_handle: Some(processor_handle),
        }
    }

    fn spawn_processor_task(
        id: Uuid,
        mut session: Session,
        processor: Processor,
        mut input_rx: mpsc::UnboundedReceiver<Input>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let span = tracing::debug_span!("session", %id);
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!("processor task cancelled");
                            break;
                        }
                        input = input_rx.recv() => {
                            match input {
                                Some(input) => processor.handle(&mut session, input),
                                None => {
                                    tracing::debug!("input channel closed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run `f` against the session on the processor task.
    ///
    /// The result is delivered after the effects of `f` are visible through
    /// [`Self::view`].
    pub async fn run<T, F>(&self, f: F) -> Result<T, Rejection>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |session| {
            let value = f(session);
            Box::new(move || {
                let _ = tx.send(value);
            })
        });
        self.input_tx
            .send(Input::Run(job))
            .map_err(|_| Rejection::SessionClosed)?;
        rx.await.map_err(|_| Rejection::SessionClosed)
    }

    /// Deliver a notification from the debuggee
    pub fn notify(&self, notification: Notification) -> Result<(), Rejection> {
        self.input_tx
            .send(Input::Notification(notification))
            .map_err(|_| Rejection::SessionClosed)
    }

    /// Get event receiver for subscribing to session events
    pub fn events(&mut self) -> &mut EventReceiver {
        &mut self.event_rx
    }

    /// The view as of the last processed input
    pub fn view(&self) -> Arc<SessionView> {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionView>> {
        self.view_rx.clone()
    }

    /// Wait until a published view satisfies `predicate`
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&Arc<SessionView>) -> bool,
    ) -> Result<Arc<SessionView>, Rejection> {
        let mut rx = self.view_rx.clone();
        let view = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Rejection::SessionClosed)?;
        Ok(Arc::clone(&view))
    }

    /// Wait until no request is outstanding
    pub async fn settled(&self) -> Result<Arc<SessionView>, Rejection> {
        self.wait_until(|view| view.is_idle()).await
    }

    pub async fn add_breakpoint(
        &self,
        location: Location,
        condition: Option<String>,
    ) -> Result<BreakpointCommand, Rejection> {
        self.run(move |session| session.add_breakpoint(location, condition))
            .await?
    }

    pub async fn remove_breakpoint(
        &self,
        breakpoint: Breakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        self.run(move |session| session.remove_breakpoint(&breakpoint))
            .await
    }

    pub async fn toggle_disabled(
        &self,
        breakpoint: Breakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        self.run(move |session| session.toggle_disabled(&breakpoint))
            .await?
    }

    pub async fn enable_all(&self) -> Result<BreakpointCommand, Rejection> {
        self.run(|session| session.enable_all()).await
    }

    pub async fn disable_all(&self) -> Result<BreakpointCommand, Rejection> {
        self.run(|session| session.disable_all()).await
    }

    pub async fn step(
        &self,
        kind: StepKind,
    ) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        self.run(move |session| session.step(kind)).await?
    }

    pub async fn select_frame(&self, frame_id: FrameId) -> Result<(), Rejection> {
        self.run(move |session| session.select_frame(&frame_id))
            .await?
    }

    pub async fn add_expression(
        &self,
        input: impl Into<String>,
    ) -> Result<CommandEnvelope<String, Value>, Rejection> {
        let input = input.into();
        self.run(move |session| session.add_expression(&input))
            .await?
    }

    pub async fn evaluate_expressions(
        &self,
        inputs: Vec<String>,
    ) -> Result<CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>>, Rejection> {
        self.run(move |session| session.evaluate_expressions(inputs))
            .await?
    }

    pub async fn set_symbols(
        &self,
        source_id: SourceId,
    ) -> Result<CommandEnvelope<SourceId, SymbolDeclarations>, Rejection> {
        self.run(move |session| session.set_symbols(&source_id))
            .await?
    }

    /// Stop the processor task and wait for it to finish
    pub async fn shutdown(mut self) -> eyre::Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.processor_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
