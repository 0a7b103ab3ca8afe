//! The session state machine.
//!
//! [`Session`] owns every subsystem and is the only thing that mutates them.
//! It is a plain synchronous object: operations validate their input, update
//! local state, and queue [`Request`]s for the debuggee. A driver takes the
//! queued requests, forwards them, and feeds the answers back through
//! [`Session::handle_response`]. Everything the debuggee reports on its own goes
//! through [`Session::handle_notification`]. Consumers read accessors or a
//! [`SessionView`] and follow the queued [`Event`]s.

use std::collections::{BTreeMap, VecDeque};

use config::SessionConfig;

use crate::{
    breakpoints::{
        AddBreakpoint, AddBreakpointResult, Breakpoint, BreakpointRegistry, Job, RemapWarning,
        RemoveBreakpoint, Target, ToggleBreakpoints,
    },
    command::{
        BreakpointCommand, Command, CommandEnvelope, CommandId, EvaluationOutcome,
        ExpressionCommand, Generation, PauseCommand, SourceCommand, SymbolCommand,
    },
    error::Rejection,
    expressions::ExpressionEvaluator,
    location::{Location, Source, SourceId, SourceMetadata, Sources},
    pause::{EvalContext, ExceptionPolicy, PauseController, Paused, StepKind, StepOutcome},
    pending_requests::{PendingItem, PendingRequests},
    protocol::{
        Analysis, LocationMapping, Notification, PauseNotification, Request, RequestBody,
        RequestId, ResponseBody,
    },
    state::{Event, SessionView},
    symbols::{AstLocation, PausePoint, Preview, PreviewRequest, SymbolDeclarations, SymbolSynchronizer},
    types::{Frame, FrameId, MappedScopes, Scope, Value},
};

fn unexpected(body: &ResponseBody) -> String {
    format!("unexpected {} response", body.kind())
}

/// Where the debuggee installed a breakpoint, given its answer to a set request
fn installed_location(body: ResponseBody, requested: &Location) -> Result<Location, String> {
    match body {
        ResponseBody::BreakpointSet { actual_location } => Ok(actual_location),
        ResponseBody::Ack => Ok(requested.clone()),
        other => Err(unexpected(&other)),
    }
}

/// The single outcome of an evaluate request issued for one input
fn single_outcome(outcome: Result<ResponseBody, String>) -> Result<EvaluationOutcome, String> {
    match outcome? {
        ResponseBody::Evaluated(outcomes) if outcomes.len() == 1 => outcomes
            .into_iter()
            .next()
            .ok_or_else(|| "empty evaluation result".to_string()),
        ResponseBody::Evaluated(outcomes) => Err(format!(
            "expected 1 evaluation result, got {}",
            outcomes.len()
        )),
        other => Err(unexpected(&other)),
    }
}

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    url: Option<String>,

    sources: Sources,
    breakpoints: BreakpointRegistry,
    pause: PauseController,
    expressions: ExpressionEvaluator,
    symbols: SymbolSynchronizer,

    pending: PendingRequests,
    last_command: u64,
    last_request: u64,
    outbox: Vec<Request>,
    events: Vec<Event>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            url: None,
            sources: Sources::default(),
            breakpoints: BreakpointRegistry::default(),
            pause: PauseController::default(),
            expressions: ExpressionEvaluator::default(),
            symbols: SymbolSynchronizer::default(),
            pending: PendingRequests::new(),
            last_command: 0,
            last_request: 0,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Url of the connected target
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.url.is_some()
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn pause(&self) -> &PauseController {
        &self.pause
    }

    pub fn expressions(&self) -> &ExpressionEvaluator {
        &self.expressions
    }

    pub fn symbols(&self) -> &SymbolSynchronizer {
        &self.symbols
    }

    /// Requests issued but not answered yet
    pub fn outstanding_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.breakpoints.queued() == 0
    }

    /// Requests queued for the debuggee since the last call
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.outbox)
    }

    /// Events emitted since the last call
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            url: self.url.clone(),
            can_rewind: self.pause.can_rewind(),
            sources: self.sources.iter().cloned().collect(),
            selection: self.sources.selection().cloned(),
            breakpoints: self.breakpoints.iter().cloned().collect(),
            pause: self.pause.state().clone(),
            waiting_on_break: self.pause.is_waiting_on_break(),
            pause_on_exceptions: self.pause.pause_on_exceptions(),
            in_flight_step: self.pause.in_flight_step().map(|e| e.id),
            expressions: self.expressions.iter().cloned().collect(),
            expression_error: self.expressions.expression_error().map(str::to_string),
            symbols: self
                .symbols
                .loaded()
                .map(|(id, declarations)| (id.clone(), declarations.clone()))
                .collect(),
            out_of_scope_locations: self.symbols.out_of_scope_locations().map(<[_]>::to_vec),
            in_scope_lines: self.symbols.in_scope_lines().to_vec(),
            preview: self
                .symbols
                .preview()
                .and_then(|e| e.result())
                .cloned(),
            history_position: self.pause.history_position(),
            outstanding_requests: self.pending.len(),
            queued_breakpoint_commands: self.breakpoints.queued(),
        }
    }

    fn next_command_id(&mut self) -> CommandId {
        self.last_command += 1;
        CommandId(self.last_command)
    }

    fn send(&mut self, body: RequestBody, item: PendingItem) -> RequestId {
        self.last_request += 1;
        let id = RequestId(self.last_request);
        tracing::debug!(request_id = %id, command = body.name(), "issuing request");
        self.pending.add(id, item);
        self.outbox.push(Request { id, body });
        id
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn publish(&mut self, command: impl Into<Command>) {
        self.emit(Event::Command {
            command: command.into(),
        });
    }

    fn supersede(&mut self, command: CommandId) {
        tracing::warn!(%command, "dropping result computed for superseded state");
        self.emit(Event::Superseded { command });
    }

    fn require_connection(&self) -> Result<(), Rejection> {
        if self.url.is_none() {
            return Err(Rejection::NoActiveSession);
        }
        Ok(())
    }

    fn require_source(&self, source_id: &SourceId) -> Result<&Source, Rejection> {
        self.sources
            .get(source_id)
            .ok_or_else(|| Rejection::UnknownSource(source_id.clone()))
    }

    fn require_breakpoint(&self, original_location: &Location) -> Result<Breakpoint, Rejection> {
        self.breakpoints
            .get(original_location)
            .cloned()
            .ok_or_else(|| Rejection::UnknownBreakpoint(original_location.clone()))
    }

    // Sources

    pub fn add_source(&mut self, source: Source) {
        self.add_sources(vec![source]);
    }

    #[tracing::instrument(skip(self, sources), level = "trace")]
    pub fn add_sources(&mut self, sources: Vec<Source>) {
        let mut changed = false;
        for source in sources {
            changed |= self.sources.insert(source);
        }
        if changed {
            self.emit(Event::SourcesChanged);
        }
    }

    /// Replace a source after it was re-analyzed
    pub fn update_source(&mut self, source: Source) -> Result<(), Rejection> {
        self.sources.update(source)?;
        self.emit(Event::SourcesChanged);
        Ok(())
    }

    /// Select the source with this url, now or as soon as it is discovered
    pub fn select_source_url(&mut self, url: impl Into<String>, line: Option<u32>) {
        self.sources.select_url(url, line);
        self.emit(Event::SourcesChanged);
    }

    pub fn clear_selected_source(&mut self) {
        self.sources.clear_selection();
        self.emit(Event::SourcesChanged);
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub fn toggle_black_box(
        &mut self,
        source_id: &SourceId,
    ) -> Result<CommandEnvelope<SourceId, bool>, Rejection> {
        let black_boxed = !self.require_source(source_id)?.is_black_boxed;
        let envelope = CommandEnvelope::pending(self.next_command_id(), source_id.clone());
        self.send(
            RequestBody::BlackBox {
                source_id: source_id.clone(),
                black_boxed,
            },
            PendingItem::BlackBox {
                envelope: envelope.clone(),
                black_boxed,
            },
        );
        self.publish(SourceCommand::BlackBox(envelope.clone()));
        Ok(envelope)
    }

    pub fn set_source_metadata(
        &mut self,
        source_id: &SourceId,
        metadata: SourceMetadata,
    ) -> Result<(), Rejection> {
        self.sources.set_metadata(source_id, metadata)?;
        self.emit(Event::AnalysisUpdated);
        Ok(())
    }

    // Breakpoints

    pub fn add_breakpoint(
        &mut self,
        location: Location,
        condition: Option<String>,
    ) -> Result<BreakpointCommand, Rejection> {
        self.add_breakpoint_with(AddBreakpoint {
            location,
            condition,
            log_value: None,
        })
    }

    /// Add a breakpoint that logs `log_value` instead of pausing
    pub fn add_log_point(
        &mut self,
        location: Location,
        log_value: impl Into<String>,
    ) -> Result<BreakpointCommand, Rejection> {
        self.add_breakpoint_with(AddBreakpoint {
            location,
            condition: None,
            log_value: Some(log_value.into()),
        })
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub fn add_breakpoint_with(
        &mut self,
        request: AddBreakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        self.require_source(&request.location.source_id)?;
        let envelope = CommandEnvelope::pending(self.next_command_id(), request);
        Ok(self.dispatch_breakpoint(BreakpointCommand::Add(envelope)))
    }

    /// Remove a breakpoint; removing one that does not exist succeeds immediately
    pub fn remove_breakpoint(&mut self, breakpoint: &Breakpoint) -> BreakpointCommand {
        self.remove_or_disable(breakpoint, false)
    }

    pub fn disable_breakpoint(
        &mut self,
        breakpoint: &Breakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        self.require_breakpoint(&breakpoint.original_location)?;
        Ok(self.remove_or_disable(breakpoint, true))
    }

    pub fn enable_breakpoint(
        &mut self,
        breakpoint: &Breakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        let current = self.require_breakpoint(&breakpoint.original_location)?;
        let envelope = CommandEnvelope::pending(self.next_command_id(), current);
        Ok(self.dispatch_breakpoint(BreakpointCommand::Enable(envelope)))
    }

    pub fn toggle_disabled(
        &mut self,
        breakpoint: &Breakpoint,
    ) -> Result<BreakpointCommand, Rejection> {
        let current = self.require_breakpoint(&breakpoint.original_location)?;
        if current.disabled {
            self.enable_breakpoint(&current)
        } else {
            self.disable_breakpoint(&current)
        }
    }

    pub fn enable_all(&mut self) -> BreakpointCommand {
        self.toggle_breakpoints(false)
    }

    pub fn disable_all(&mut self) -> BreakpointCommand {
        self.toggle_breakpoints(true)
    }

    /// Enable or disable every breakpoint in one transition
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn toggle_breakpoints(&mut self, should_disable: bool) -> BreakpointCommand {
        let envelope = CommandEnvelope::pending(
            self.next_command_id(),
            ToggleBreakpoints { should_disable },
        );
        self.dispatch_breakpoint(BreakpointCommand::ToggleAll(envelope))
    }

    /// Change a breakpoint's condition locally
    pub fn set_breakpoint_condition(
        &mut self,
        breakpoint: &Breakpoint,
        condition: Option<String>,
    ) -> Result<Breakpoint, Rejection> {
        let updated = self
            .breakpoints
            .set_condition(&breakpoint.original_location, condition)?;
        self.emit(Event::BreakpointsChanged);
        Ok(updated)
    }

    /// Move breakpoints to new locations, keyed by their original location
    #[tracing::instrument(skip(self, breakpoints), level = "trace")]
    pub fn remap_breakpoints(&mut self, breakpoints: Vec<Breakpoint>) {
        let warnings = self.breakpoints.remap(breakpoints);
        self.emit(Event::BreakpointsChanged);
        self.warn_remap(warnings);
    }

    /// Replace the breakpoint found at `previous_location` with its re-resolved form.
    ///
    /// Waits for commands still running on that breakpoint, and for a bulk toggle.
    pub fn sync_breakpoint(&mut self, previous_location: &Location, breakpoint: Option<Breakpoint>) {
        let job = Job::Sync {
            previous_location: previous_location.clone(),
            breakpoint,
        };
        if let Some(job) = self.breakpoints.admit(job) {
            self.run_breakpoint_jobs(vec![job]);
        }
    }

    fn warn_remap(&mut self, warnings: Vec<RemapWarning>) {
        for warning in warnings {
            tracing::warn!(
                original = %warning.original_location,
                reason = %warning.reason,
                "breakpoint could not be remapped"
            );
            self.emit(Event::RemapWarning(warning));
        }
    }

    fn reprocess_source(&mut self, source_id: &SourceId, mappings: &[LocationMapping]) {
        let mut remapped = Vec::new();
        let mut warnings = Vec::new();
        for breakpoint in self.breakpoints.for_source(source_id) {
            let target = mappings
                .iter()
                .find(|m| m.from == breakpoint.location)
                .and_then(|m| m.to.clone());
            match target {
                Some(location) => remapped.push(Breakpoint {
                    location,
                    ..breakpoint.clone()
                }),
                None => warnings.push(RemapWarning {
                    original_location: breakpoint.original_location.clone(),
                    kept_location: Some(breakpoint.location.clone()),
                    reason: format!("no mapping for {} in reprocessed source", breakpoint.location),
                }),
            }
        }
        if !remapped.is_empty() {
            warnings.extend(self.breakpoints.remap(remapped));
            self.emit(Event::BreakpointsChanged);
        }
        self.warn_remap(warnings);
    }

    fn remove_or_disable(&mut self, breakpoint: &Breakpoint, disabled_only: bool) -> BreakpointCommand {
        let envelope = CommandEnvelope::pending(
            self.next_command_id(),
            RemoveBreakpoint {
                breakpoint: breakpoint.clone(),
                disabled_only,
            },
        );
        self.dispatch_breakpoint(BreakpointCommand::Remove(envelope))
    }

    /// Run a breakpoint command now, or queue it behind conflicting ones.
    ///
    /// Returns the command as it stands after dispatch: terminal if it needed
    /// no round trip, pending otherwise.
    fn dispatch_breakpoint(&mut self, command: BreakpointCommand) -> BreakpointCommand {
        if self
            .breakpoints
            .admit(Job::Command(command.clone()))
            .is_none()
        {
            self.publish(command.clone());
            return command;
        }
        match self.start_breakpoint(command.clone()) {
            Some(done) => {
                let ready = self.finish_breakpoint(done.clone());
                self.run_breakpoint_jobs(ready);
                done
            }
            None => {
                self.publish(command.clone());
                command
            }
        }
    }

    /// Run jobs released by the scheduler until none is left that completes locally
    fn run_breakpoint_jobs(&mut self, ready: Vec<Job>) {
        let mut ready = VecDeque::from(ready);
        while let Some(job) = ready.pop_front() {
            let target = job.target();
            let finished = match job {
                Job::Command(command) => match self.start_breakpoint(command) {
                    Some(done) => {
                        self.publish(done);
                        true
                    }
                    None => false,
                },
                Job::Reinstall(original_location) => self.start_reinstall(original_location),
                Job::Sync {
                    previous_location,
                    breakpoint,
                } => {
                    tracing::debug!(%previous_location, dropped = breakpoint.is_none(), "syncing breakpoint");
                    self.breakpoints.sync(&previous_location, breakpoint);
                    self.emit(Event::BreakpointsChanged);
                    true
                }
            };
            if finished {
                ready.extend(self.breakpoints.finish(&target));
            }
        }
    }

    fn finish_breakpoint(&mut self, done: BreakpointCommand) -> Vec<Job> {
        let target = done.target();
        self.publish(done);
        self.breakpoints.finish(&target)
    }

    /// Start a command that holds its target, returning it if it completed without a round trip
    fn start_breakpoint(&mut self, command: BreakpointCommand) -> Option<BreakpointCommand> {
        match command {
            BreakpointCommand::Add(mut envelope) => {
                let location = envelope.payload.location.clone();
                if let Some(existing) = self.breakpoints.get(&location) {
                    envelope.succeed(AddBreakpointResult {
                        previous_location: location,
                        breakpoint: existing.clone(),
                    });
                    return Some(BreakpointCommand::Add(envelope));
                }
                if !self.sources.contains(&location.source_id) {
                    envelope.fail(Rejection::UnknownSource(location.source_id).to_string());
                    return Some(BreakpointCommand::Add(envelope));
                }
                let body = RequestBody::SetBreakpoint {
                    location,
                    condition: envelope.payload.condition.clone(),
                    log_value: envelope.payload.log_value.clone(),
                };
                self.send(
                    body,
                    PendingItem::Breakpoint(BreakpointCommand::Add(envelope)),
                );
                None
            }
            BreakpointCommand::Remove(mut envelope) => {
                let original = envelope.payload.breakpoint.original_location.clone();
                match self.breakpoints.get(&original).cloned() {
                    None => {
                        envelope.succeed(());
                        Some(BreakpointCommand::Remove(envelope))
                    }
                    // not installed, nothing to tell the debuggee
                    Some(existing) if existing.disabled => {
                        if !envelope.payload.disabled_only {
                            self.breakpoints.remove(&original);
                            self.emit(Event::BreakpointsChanged);
                        }
                        envelope.succeed(());
                        Some(BreakpointCommand::Remove(envelope))
                    }
                    Some(existing) => {
                        self.send(
                            RequestBody::RemoveBreakpoint {
                                location: existing.location,
                            },
                            PendingItem::Breakpoint(BreakpointCommand::Remove(envelope)),
                        );
                        None
                    }
                }
            }
            BreakpointCommand::Enable(mut envelope) => {
                let original = envelope.payload.original_location.clone();
                match self.breakpoints.get(&original).cloned() {
                    None => {
                        envelope.fail(Rejection::UnknownBreakpoint(original).to_string());
                        Some(BreakpointCommand::Enable(envelope))
                    }
                    Some(existing) if existing.is_active() => {
                        envelope.succeed(AddBreakpointResult {
                            previous_location: existing.location.clone(),
                            breakpoint: existing,
                        });
                        Some(BreakpointCommand::Enable(envelope))
                    }
                    Some(existing) => {
                        self.send(
                            RequestBody::SetBreakpoint {
                                location: existing.location,
                                condition: existing.condition,
                                log_value: existing.log_value,
                            },
                            PendingItem::Breakpoint(BreakpointCommand::Enable(envelope)),
                        );
                        None
                    }
                }
            }
            BreakpointCommand::ToggleAll(mut envelope) => {
                let should_disable = envelope.payload.should_disable;
                let installed = self.breakpoints.begin_toggle(should_disable);
                if installed.is_empty() {
                    envelope.succeed(Vec::new());
                    return Some(BreakpointCommand::ToggleAll(envelope));
                }
                self.send(
                    RequestBody::ToggleBreakpoints {
                        locations: installed,
                        should_disable,
                    },
                    PendingItem::Breakpoint(BreakpointCommand::ToggleAll(envelope)),
                );
                None
            }
        }
    }

    fn on_breakpoint_response(
        &mut self,
        command: BreakpointCommand,
        outcome: Result<ResponseBody, String>,
    ) {
        let done = match command {
            BreakpointCommand::Add(mut envelope) => {
                match outcome.and_then(|body| installed_location(body, &envelope.payload.location)) {
                    Ok(location) => {
                        let result = self.breakpoints.insert_added(&envelope.payload, location);
                        envelope.succeed(result);
                        self.emit(Event::BreakpointsChanged);
                    }
                    Err(message) => envelope.fail(message),
                }
                BreakpointCommand::Add(envelope)
            }
            BreakpointCommand::Remove(mut envelope) => {
                match outcome {
                    Ok(_) => {
                        let original = &envelope.payload.breakpoint.original_location;
                        if envelope.payload.disabled_only {
                            self.breakpoints.set_disabled(original);
                        } else {
                            self.breakpoints.remove(original);
                        }
                        envelope.succeed(());
                        self.emit(Event::BreakpointsChanged);
                    }
                    Err(message) => envelope.fail(message),
                }
                BreakpointCommand::Remove(envelope)
            }
            BreakpointCommand::Enable(mut envelope) => {
                let requested = envelope.payload.location.clone();
                match outcome.and_then(|body| installed_location(body, &requested)) {
                    Ok(location) => {
                        match self
                            .breakpoints
                            .set_enabled(&envelope.payload.original_location, Some(location))
                        {
                            Some(breakpoint) => {
                                envelope.succeed(AddBreakpointResult {
                                    previous_location: requested,
                                    breakpoint,
                                });
                                self.emit(Event::BreakpointsChanged);
                            }
                            None => envelope.fail("breakpoint was removed while being enabled"),
                        }
                    }
                    Err(message) => envelope.fail(message),
                }
                BreakpointCommand::Enable(envelope)
            }
            BreakpointCommand::ToggleAll(mut envelope) => {
                match outcome {
                    Ok(_) => {
                        let changed = self
                            .breakpoints
                            .complete_toggle(envelope.payload.should_disable);
                        envelope.succeed(changed);
                        self.emit(Event::BreakpointsChanged);
                    }
                    Err(message) => {
                        self.breakpoints.abandon_toggle();
                        envelope.fail(message);
                    }
                }
                BreakpointCommand::ToggleAll(envelope)
            }
        };
        if let Some(message) = done.error() {
            tracing::error!(command = %done.id(), %message, "breakpoint command failed");
        }
        let ready = self.finish_breakpoint(done);
        self.run_breakpoint_jobs(ready);
    }

    /// Install every active breakpoint against a new debuggee target
    fn reinstall_breakpoints(&mut self) {
        let ready = self.breakpoints.reinstall_all();
        self.run_breakpoint_jobs(ready);
    }

    /// Install one breakpoint on the current target, returning true if there was nothing to install
    fn start_reinstall(&mut self, original_location: Location) -> bool {
        let Some(breakpoint) = self
            .breakpoints
            .get(&original_location)
            .filter(|bp| bp.is_active())
            .cloned()
        else {
            return true;
        };
        self.send(
            RequestBody::SetBreakpoint {
                location: breakpoint.location,
                condition: breakpoint.condition,
                log_value: breakpoint.log_value,
            },
            PendingItem::Reinstall { original_location },
        );
        false
    }

    fn on_reinstalled(&mut self, original_location: Location, outcome: Result<ResponseBody, String>) {
        if let Some(current) = self.breakpoints.get(&original_location).cloned() {
            match outcome.and_then(|body| installed_location(body, &current.location)) {
                Ok(location) if location != current.location => {
                    self.remap_breakpoints(vec![Breakpoint { location, ..current }]);
                }
                Ok(_) => {}
                Err(reason) => self.warn_remap(vec![RemapWarning {
                    original_location: original_location.clone(),
                    kept_location: Some(current.location),
                    reason,
                }]),
            }
        }
        let ready = self.breakpoints.finish(&Target::One(original_location));
        self.run_breakpoint_jobs(ready);
    }

    // Pause

    #[tracing::instrument(skip(self), level = "trace")]
    pub fn step(&mut self, kind: StepKind) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        let id = self.next_command_id();
        let envelope = self.pause.begin_step(id, kind)?;
        self.send(RequestBody::Step(kind), PendingItem::Step(id));
        self.publish(PauseCommand::Step(envelope.clone()));
        Ok(envelope)
    }

    pub fn resume(&mut self) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        self.step(StepKind::Resume)
    }

    pub fn step_over(&mut self) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        self.step(StepKind::Over)
    }

    pub fn step_in(&mut self) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        self.step(StepKind::In)
    }

    pub fn step_out(&mut self) -> Result<CommandEnvelope<StepKind, StepOutcome>, Rejection> {
        self.step(StepKind::Out)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    pub fn select_frame(&mut self, frame_id: &FrameId) -> Result<(), Rejection> {
        let previous = self.pause.selected_frame_id().cloned();
        let needs_scopes = self.pause.select_frame(frame_id)?;
        if previous.as_ref() == Some(frame_id) {
            return Ok(());
        }

        self.emit(Event::FrameSelected {
            frame_id: frame_id.clone(),
        });
        self.expressions.invalidate();
        self.emit(Event::ExpressionsChanged);
        self.drop_preview();

        if needs_scopes && self.config.fetch_scopes_on_select {
            self.add_scopes(frame_id)?;
        }
        if self.config.evaluate_on_pause {
            self.reevaluate();
        }
        Ok(())
    }

    pub fn set_break_on_next(&mut self, enabled: bool) -> CommandEnvelope<bool, ()> {
        let envelope = CommandEnvelope::pending(self.next_command_id(), enabled);
        self.send(
            RequestBody::BreakOnNext(enabled),
            PendingItem::BreakOnNext(envelope.clone()),
        );
        self.publish(PauseCommand::BreakOnNext(envelope.clone()));
        envelope
    }

    pub fn set_pause_on_exceptions(
        &mut self,
        should_pause: bool,
        should_ignore_caught: bool,
    ) -> CommandEnvelope<ExceptionPolicy, ()> {
        let policy = ExceptionPolicy {
            should_pause,
            should_ignore_caught,
        };
        let envelope = CommandEnvelope::pending(self.next_command_id(), policy);
        self.send(
            RequestBody::PauseOnExceptions(policy),
            PendingItem::PauseOnExceptions(envelope.clone()),
        );
        self.publish(PauseCommand::PauseOnExceptions(envelope.clone()));
        envelope
    }

    /// Fetch the scopes of a frame that did not come with the pause
    pub fn add_scopes(&mut self, frame_id: &FrameId) -> Result<CommandEnvelope<FrameId, Scope>, Rejection> {
        let generation = self.pause.require_frame(frame_id)?;
        let envelope = CommandEnvelope::pending(self.next_command_id(), frame_id.clone());
        self.send(
            RequestBody::Scopes {
                frame_id: frame_id.clone(),
            },
            PendingItem::Scopes {
                envelope: envelope.clone(),
                generation,
            },
        );
        self.publish(PauseCommand::AddScopes(envelope.clone()));
        Ok(envelope)
    }

    /// Fetch the original names of a frame's bindings
    pub fn map_scopes(
        &mut self,
        frame_id: &FrameId,
    ) -> Result<CommandEnvelope<FrameId, MappedScopes>, Rejection> {
        let generation = self.pause.require_frame(frame_id)?;
        let envelope = CommandEnvelope::pending(self.next_command_id(), frame_id.clone());
        self.send(
            RequestBody::MapScopes {
                frame_id: frame_id.clone(),
            },
            PendingItem::MapScopes {
                envelope: envelope.clone(),
                generation,
            },
        );
        self.publish(PauseCommand::MapScopes(envelope.clone()));
        Ok(envelope)
    }

    /// Replace the stack with its source-mapped version
    pub fn map_frames(&mut self, frames: Vec<Frame>) -> Result<(), Rejection> {
        let previous = self.pause.selected_frame_id().cloned();
        self.pause.map_frames(frames)?;
        if let Some(selected) = self.pause.selected_frame_id().cloned() {
            if previous.as_ref() != Some(&selected) {
                self.emit(Event::FrameSelected { frame_id: selected });
                self.expressions.invalidate();
                self.emit(Event::ExpressionsChanged);
                self.drop_preview();
            }
        }
        Ok(())
    }

    pub fn set_popup_object_properties(
        &mut self,
        object_id: impl Into<String>,
        properties: BTreeMap<String, Value>,
    ) -> Result<(), Rejection> {
        self.pause
            .set_popup_object_properties(object_id.into(), properties)
    }

    /// Jump to a recorded point of the execution history
    #[tracing::instrument(skip(self, paused, expressions), level = "trace")]
    pub fn travel_to(
        &mut self,
        position: u64,
        paused: PauseNotification,
        expressions: Vec<(String, EvaluationOutcome)>,
    ) {
        let Some(paused) = self.pause.travel_to(position, paused) else {
            return;
        };
        self.emit(Event::Paused {
            generation: paused.generation,
            why: paused.why,
        });
        if let Some(step) = paused.completed_step {
            self.publish(step);
        }
        self.expressions.replace_results(expressions);
        self.emit(Event::ExpressionsChanged);
        self.drop_preview();
        self.emit(Event::Travelled { position });
    }

    pub fn clear_history(&mut self) {
        self.pause.clear_history();
        self.emit(Event::HistoryCleared);
    }

    fn on_paused(&mut self, paused: Paused) {
        self.emit(Event::Paused {
            generation: paused.generation,
            why: paused.why,
        });
        if let Some(step) = paused.completed_step {
            self.publish(step);
        }
        self.expressions.invalidate();
        self.emit(Event::ExpressionsChanged);
        self.drop_preview();
        if self.config.fetch_scopes_on_select {
            if let Some(frame_id) = self.pause.selected_frame_without_scopes() {
                if let Err(rejection) = self.add_scopes(&frame_id) {
                    tracing::warn!(%rejection, "could not fetch scopes of the selected frame");
                }
            }
        }
        if self.config.evaluate_on_pause {
            self.reevaluate();
        }
    }

    fn after_resume(&mut self) {
        self.emit(Event::Resumed {
            generation: self.pause.generation(),
        });
        self.expressions.invalidate();
        self.emit(Event::ExpressionsChanged);
        self.drop_preview();
    }

    fn on_step_response(&mut self, id: CommandId, outcome: Result<ResponseBody, String>) {
        match outcome {
            Ok(_) => {
                let was_paused = self.pause.is_paused();
                let done = self.pause.step_accepted(id);
                if was_paused && !self.pause.is_paused() {
                    self.after_resume();
                }
                if let Some(done) = done {
                    self.publish(done);
                }
            }
            Err(message) => {
                tracing::error!(command = %id, %message, "step failed");
                if let Some(done) = self.pause.step_failed(id, message) {
                    self.publish(done);
                }
            }
        }
    }

    fn on_scopes_response(
        &mut self,
        mut envelope: CommandEnvelope<FrameId, Scope>,
        generation: Generation,
        outcome: Result<ResponseBody, String>,
    ) {
        match outcome {
            Ok(ResponseBody::Scopes(scope)) => {
                if !self
                    .pause
                    .apply_scopes(generation, &envelope.payload, scope.clone())
                {
                    self.supersede(envelope.id);
                    return;
                }
                envelope.succeed(scope);
            }
            Ok(other) => envelope.fail(unexpected(&other)),
            Err(message) => envelope.fail(message),
        }
        self.publish(PauseCommand::AddScopes(envelope));
    }

    fn on_mapped_scopes_response(
        &mut self,
        mut envelope: CommandEnvelope<FrameId, MappedScopes>,
        generation: Generation,
        outcome: Result<ResponseBody, String>,
    ) {
        match outcome {
            Ok(ResponseBody::MappedScopes(mapped)) => {
                if !self
                    .pause
                    .apply_mapped_scopes(generation, &envelope.payload, mapped.clone())
                {
                    self.supersede(envelope.id);
                    return;
                }
                envelope.succeed(mapped);
            }
            Ok(other) => envelope.fail(unexpected(&other)),
            Err(message) => envelope.fail(message),
        }
        self.publish(PauseCommand::MapScopes(envelope));
    }

    // Expressions

    /// Add a watch expression and evaluate it against the selected frame
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn add_expression(&mut self, input: &str) -> Result<CommandEnvelope<String, Value>, Rejection> {
        self.require_connection()?;
        self.expressions.upsert(input);
        self.emit(Event::ExpressionsChanged);
        Ok(self.issue_evaluate(input.to_string()))
    }

    pub fn update_expression(
        &mut self,
        old_input: &str,
        new_input: &str,
    ) -> Result<CommandEnvelope<String, Value>, Rejection> {
        self.require_connection()?;
        self.expressions.update(old_input, new_input)?;
        self.emit(Event::ExpressionsChanged);
        Ok(self.issue_evaluate(new_input.to_string()))
    }

    pub fn delete_expression(&mut self, input: &str) -> bool {
        let deleted = self.expressions.delete(input);
        if deleted {
            self.emit(Event::ExpressionsChanged);
        }
        deleted
    }

    pub fn clear_expression_error(&mut self) {
        self.expressions.clear_error();
        self.emit(Event::ExpressionsChanged);
    }

    /// Evaluate several inputs in one request; results keep the input order
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn evaluate_expressions(
        &mut self,
        inputs: Vec<String>,
    ) -> Result<CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>>, Rejection> {
        self.require_connection()?;
        Ok(self.issue_evaluate_all(inputs))
    }

    fn issue_evaluate(&mut self, input: String) -> CommandEnvelope<String, Value> {
        let context = self.pause.eval_context();
        let envelope = CommandEnvelope::pending(self.next_command_id(), input.clone());
        self.send(
            RequestBody::Evaluate {
                inputs: vec![input],
                frame_id: context.frame_id.clone(),
            },
            PendingItem::Evaluate {
                envelope: envelope.clone(),
                context,
            },
        );
        self.publish(ExpressionCommand::Evaluate(envelope.clone()));
        envelope
    }

    fn issue_evaluate_all(
        &mut self,
        inputs: Vec<String>,
    ) -> CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>> {
        let context = self.pause.eval_context();
        let envelope = CommandEnvelope::pending(self.next_command_id(), inputs.clone());
        self.send(
            RequestBody::Evaluate {
                inputs,
                frame_id: context.frame_id.clone(),
            },
            PendingItem::EvaluateAll {
                envelope: envelope.clone(),
                context,
            },
        );
        self.publish(ExpressionCommand::EvaluateAll(envelope.clone()));
        envelope
    }

    /// Re-evaluate every watch expression against the current frame
    fn reevaluate(&mut self) {
        if self.url.is_none() || self.expressions.is_empty() {
            return;
        }
        let inputs = self.expressions.inputs();
        self.issue_evaluate_all(inputs);
    }

    fn on_evaluated(
        &mut self,
        mut envelope: CommandEnvelope<String, Value>,
        context: EvalContext,
        outcome: Result<ResponseBody, String>,
    ) {
        if context != self.pause.eval_context() {
            self.supersede(envelope.id);
            return;
        }
        match single_outcome(outcome) {
            Ok(result) => {
                self.expressions.apply(&envelope.payload, result.clone());
                match result {
                    Ok(value) => envelope.succeed(value),
                    Err(message) => envelope.fail(message),
                }
            }
            Err(message) => {
                tracing::error!(command = %envelope.id, %message, "evaluation failed");
                self.expressions
                    .apply(&envelope.payload, Err(message.clone()));
                self.expressions.set_error(message.clone());
                envelope.fail(message);
            }
        }
        self.emit(Event::ExpressionsChanged);
        self.publish(ExpressionCommand::Evaluate(envelope));
    }

    fn on_evaluated_all(
        &mut self,
        mut envelope: CommandEnvelope<Vec<String>, Vec<EvaluationOutcome>>,
        context: EvalContext,
        outcome: Result<ResponseBody, String>,
    ) {
        if context != self.pause.eval_context() {
            self.supersede(envelope.id);
            return;
        }
        let expected = envelope.payload.len();
        let outcomes = match outcome {
            Ok(ResponseBody::Evaluated(outcomes)) if outcomes.len() == expected => Ok(outcomes),
            Ok(ResponseBody::Evaluated(outcomes)) => Err(format!(
                "expected {expected} evaluation results, got {}",
                outcomes.len()
            )),
            Ok(other) => Err(unexpected(&other)),
            Err(message) => Err(message),
        };
        match outcomes {
            Ok(outcomes) => {
                for (input, result) in envelope.payload.iter().zip(&outcomes) {
                    self.expressions.apply(input, result.clone());
                }
                envelope.succeed(outcomes);
            }
            Err(message) => {
                tracing::error!(command = %envelope.id, %message, "batch evaluation failed");
                self.expressions.set_error(message.clone());
                envelope.fail(message);
            }
        }
        self.emit(Event::ExpressionsChanged);
        self.publish(ExpressionCommand::EvaluateAll(envelope));
    }

    // Symbols

    /// Load symbols for a source once; later calls observe the same command
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn set_symbols(
        &mut self,
        source_id: &SourceId,
    ) -> Result<CommandEnvelope<SourceId, SymbolDeclarations>, Rejection> {
        self.require_source(source_id)?;
        let id = self.next_command_id();
        let (envelope, issue) = self.symbols.begin(id, source_id);
        if issue {
            self.send(
                RequestBody::Symbols {
                    source_id: source_id.clone(),
                },
                PendingItem::Symbols {
                    source_id: source_id.clone(),
                    command: id,
                },
            );
            self.publish(SymbolCommand::SetSymbols(envelope.clone()));
        }
        Ok(envelope)
    }

    pub fn set_pause_points(
        &mut self,
        source_id: &SourceId,
        pause_points: Vec<PausePoint>,
    ) -> Result<(), Rejection> {
        self.require_source(source_id)?;
        self.symbols.set_pause_points(source_id.clone(), pause_points);
        self.emit(Event::AnalysisUpdated);
        Ok(())
    }

    /// `None` clears the locations, which is not the same as an empty list
    pub fn set_out_of_scope_locations(&mut self, locations: Option<Vec<AstLocation>>) {
        self.symbols.set_out_of_scope_locations(locations);
        self.emit(Event::AnalysisUpdated);
    }

    pub fn set_in_scope_lines(&mut self, lines: Vec<u32>) {
        self.symbols.set_in_scope_lines(lines);
        self.emit(Event::AnalysisUpdated);
    }

    /// Evaluate the expression under the cursor in the selected frame
    #[tracing::instrument(skip(self), level = "trace")]
    pub fn set_preview(
        &mut self,
        expression: &str,
        location: AstLocation,
    ) -> Result<CommandEnvelope<PreviewRequest, Preview>, Rejection> {
        self.require_connection()?;
        if !self.pause.is_paused() {
            return Err(Rejection::NotPaused);
        }
        let context = self.pause.eval_context();
        let id = self.next_command_id();
        let envelope = self.symbols.begin_preview(
            id,
            PreviewRequest {
                expression: expression.to_string(),
                location,
            },
        );
        self.send(
            RequestBody::Evaluate {
                inputs: vec![expression.to_string()],
                frame_id: context.frame_id.clone(),
            },
            PendingItem::Preview {
                command: envelope.id,
                context,
            },
        );
        self.publish(SymbolCommand::SetPreview(envelope.clone()));
        self.emit(Event::PreviewChanged);
        Ok(envelope)
    }

    /// Drop the preview and the cursor selection it was computed for
    pub fn clear_selection(&mut self) {
        self.drop_preview();
    }

    fn drop_preview(&mut self) {
        if self.symbols.clear_preview() {
            self.emit(Event::PreviewChanged);
        }
    }

    fn on_preview_response(
        &mut self,
        command: CommandId,
        context: EvalContext,
        outcome: Result<ResponseBody, String>,
    ) {
        if context != self.pause.eval_context() {
            self.supersede(command);
            return;
        }
        let outcome = single_outcome(outcome).and_then(|result| result);
        if let Err(message) = &outcome {
            tracing::debug!(%command, %message, "preview failed");
        }
        match self.symbols.complete_preview(command, outcome) {
            Some(done) => {
                self.publish(done);
                self.emit(Event::PreviewChanged);
            }
            None => self.supersede(command),
        }
    }

    fn on_symbols_response(
        &mut self,
        source_id: SourceId,
        command: CommandId,
        outcome: Result<ResponseBody, String>,
    ) {
        let outcome = match outcome {
            Ok(ResponseBody::Symbols(declarations)) => Ok(declarations),
            Ok(other) => Err(unexpected(&other)),
            Err(message) => Err(message),
        };
        let succeeded = outcome.is_ok();
        match self.symbols.complete(&source_id, command, outcome) {
            Some(done) => {
                self.publish(done);
                if succeeded {
                    self.emit(Event::SymbolsChanged { source_id });
                }
            }
            None => self.supersede(command),
        }
    }

    // Inbound

    /// Apply something the debuggee reported.
    ///
    /// Notifications are applied strictly in the order they are handed in.
    #[tracing::instrument(skip(self, notification), fields(kind = notification.kind()), level = "trace")]
    pub fn handle_notification(&mut self, notification: Notification) {
        match notification {
            Notification::Connected { url, can_rewind } => {
                tracing::debug!(%url, can_rewind, "connected");
                self.url = Some(url.clone());
                self.pause.set_can_rewind(can_rewind);
                self.emit(Event::Connected { url, can_rewind });
                self.reinstall_breakpoints();
            }
            Notification::Navigated { url } => self.navigate(url),
            Notification::Paused(paused) => {
                if let Some(paused) = self.pause.on_paused(paused) {
                    self.on_paused(paused);
                }
            }
            Notification::Resumed => {
                if self.pause.on_resumed() {
                    self.after_resume();
                }
                if let Some(done) = self.pause.complete_resume() {
                    self.publish(done);
                }
            }
            Notification::SourcesDiscovered { sources } => self.add_sources(sources),
            Notification::SourceReprocessed {
                source_id,
                mappings,
            } => self.reprocess_source(&source_id, &mappings),
            Notification::BreakpointSynced {
                previous_location,
                breakpoint,
            } => self.sync_breakpoint(&previous_location, breakpoint),
            Notification::TravelTo {
                position,
                paused,
                expressions,
            } => self.travel_to(position, paused, expressions),
            Notification::ClearHistory => self.clear_history(),
            Notification::Analysis(analysis) => self.on_analysis(analysis),
        }
    }

    fn navigate(&mut self, url: String) {
        tracing::debug!(%url, "navigated");
        let was_paused = self.pause.is_paused();
        self.url = Some(url.clone());

        self.sources.supersede();
        let had_preview = self.symbols.preview().is_some();
        for abandoned in self.symbols.clear() {
            self.publish(abandoned);
        }
        if let Some(abandoned) = self.pause.reset() {
            self.publish(abandoned);
        }
        if was_paused {
            self.emit(Event::Resumed {
                generation: self.pause.generation(),
            });
        }
        self.expressions.invalidate();

        self.emit(Event::Navigated { url });
        self.emit(Event::SourcesChanged);
        self.emit(Event::ExpressionsChanged);
        if had_preview {
            self.emit(Event::PreviewChanged);
        }
        self.reinstall_breakpoints();
    }

    fn on_analysis(&mut self, analysis: Analysis) {
        let applied = match analysis {
            Analysis::PausePoints {
                source_id,
                pause_points,
            } => self.set_pause_points(&source_id, pause_points),
            Analysis::OutOfScopeLocations { locations } => {
                self.set_out_of_scope_locations(locations);
                Ok(())
            }
            Analysis::InScopeLines { lines } => {
                self.set_in_scope_lines(lines);
                Ok(())
            }
            Analysis::SourceMetadata {
                source_id,
                metadata,
            } => self.set_source_metadata(&source_id, metadata),
        };
        if let Err(rejection) = applied {
            tracing::warn!(%rejection, "ignoring analysis result");
        }
    }

    /// Apply the debuggee's answer to request `id`
    #[tracing::instrument(skip(self, outcome), level = "trace")]
    pub fn handle_response(&mut self, id: RequestId, outcome: eyre::Result<ResponseBody>) {
        let Some(item) = self.pending.take(id) else {
            tracing::warn!(request_id = %id, "response for unknown request");
            return;
        };
        let outcome = outcome.map_err(|error| format!("{error:#}"));

        match item {
            PendingItem::Breakpoint(command) => self.on_breakpoint_response(command, outcome),
            PendingItem::Reinstall { original_location } => {
                self.on_reinstalled(original_location, outcome)
            }
            PendingItem::Step(command) => self.on_step_response(command, outcome),
            PendingItem::BreakOnNext(mut envelope) => {
                match outcome {
                    Ok(_) => {
                        self.pause.set_waiting_on_break(envelope.payload);
                        envelope.succeed(());
                    }
                    Err(message) => envelope.fail(message),
                }
                self.publish(PauseCommand::BreakOnNext(envelope));
            }
            PendingItem::PauseOnExceptions(mut envelope) => {
                match outcome {
                    Ok(_) => {
                        self.pause.set_pause_on_exceptions(envelope.payload);
                        envelope.succeed(());
                    }
                    Err(message) => envelope.fail(message),
                }
                self.publish(PauseCommand::PauseOnExceptions(envelope));
            }
            PendingItem::Scopes {
                envelope,
                generation,
            } => self.on_scopes_response(envelope, generation, outcome),
            PendingItem::MapScopes {
                envelope,
                generation,
            } => self.on_mapped_scopes_response(envelope, generation, outcome),
            PendingItem::Evaluate { envelope, context } => {
                self.on_evaluated(envelope, context, outcome)
            }
            PendingItem::EvaluateAll { envelope, context } => {
                self.on_evaluated_all(envelope, context, outcome)
            }
            PendingItem::Symbols { source_id, command } => {
                self.on_symbols_response(source_id, command, outcome)
            }
            PendingItem::Preview { command, context } => {
                self.on_preview_response(command, context, outcome)
            }
            PendingItem::BlackBox {
                mut envelope,
                black_boxed,
            } => {
                match outcome {
                    Ok(_) => {
                        if self.sources.set_black_boxed(&envelope.payload, black_boxed) {
                            envelope.succeed(black_boxed);
                            self.emit(Event::SourcesChanged);
                        } else {
                            let message = Rejection::UnknownSource(envelope.payload.clone()).to_string();
                            envelope.fail(message);
                        }
                    }
                    Err(message) => envelope.fail(message),
                }
                self.publish(SourceCommand::BlackBox(envelope));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::Phase,
        location::Selection,
        symbols::Position,
        testing::{paused, paused_at, source},
    };
    use serde_json::json;

    fn connected_with(config: SessionConfig) -> Session {
        let mut session = Session::new(config);
        session.handle_notification(Notification::Connected {
            url: "http://localhost/".to_string(),
            can_rewind: false,
        });
        session.add_sources(vec![source("s1"), source("s2")]);
        session.take_events();
        session
    }

    fn connected() -> Session {
        connected_with(SessionConfig {
            evaluate_on_pause: false,
            ..SessionConfig::default()
        })
    }

    fn next_request(session: &mut Session) -> Request {
        let mut requests = session.take_requests();
        assert_eq!(requests.len(), 1, "expected one request, got {requests:?}");
        requests.remove(0)
    }

    fn commands(session: &mut Session) -> Vec<Command> {
        session
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Command { command } => Some(command),
                _ => None,
            })
            .collect()
    }

    fn navigate(session: &mut Session) {
        session.handle_notification(Notification::Navigated {
            url: "http://localhost/next".to_string(),
        });
    }

    fn hovered() -> AstLocation {
        AstLocation {
            start: Position { line: 10, column: 4 },
            end: Position { line: 10, column: 9 },
        }
    }

    fn add_and_install(session: &mut Session, line: u32) -> Breakpoint {
        let location = Location::new("s1", line);
        session.add_breakpoint(location.clone(), None).unwrap();
        let request = next_request(session);
        session.handle_response(request.id, Ok(ResponseBody::Ack));
        session.breakpoints().get(&location).unwrap().clone()
    }

    #[test]
    fn adding_twice_at_the_same_location_is_idempotent() {
        let mut session = connected();
        let requested = Location::new("s1", 10);

        let first = session.add_breakpoint(requested.clone(), None).unwrap();
        assert!(first.is_pending());
        let request = next_request(&mut session);
        assert!(
            matches!(&request.body, RequestBody::SetBreakpoint { location, .. } if *location == requested)
        );
        session.handle_response(
            request.id,
            Ok(ResponseBody::BreakpointSet {
                actual_location: Location::new("s1", 12),
            }),
        );

        let second = session.add_breakpoint(requested.clone(), None).unwrap();
        let BreakpointCommand::Add(envelope) = second else {
            panic!("expected an add command");
        };
        let result = envelope.result().unwrap();
        assert_eq!(result.previous_location, requested);
        assert_eq!(result.breakpoint.location, Location::new("s1", 12));
        assert_eq!(result.breakpoint.original_location, requested);
        assert!(result.was_moved());

        assert!(session.take_requests().is_empty());
        assert_eq!(session.breakpoints().len(), 1);
    }

    #[test]
    fn add_in_unknown_source_is_rejected() {
        let mut session = connected();
        let err = session
            .add_breakpoint(Location::new("nope", 1), None)
            .unwrap_err();
        assert_eq!(err, Rejection::UnknownSource(SourceId::new("nope")));
        assert!(session.take_requests().is_empty());
    }

    #[test]
    fn failed_add_leaves_the_registry_unchanged() {
        let mut session = connected();
        session
            .add_breakpoint(Location::new("s1", 4), Some("i > 2".to_string()))
            .unwrap();
        let request = next_request(&mut session);
        session.take_events();

        session.handle_response(request.id, Err(eyre::eyre!("no code at line 4")));
        assert!(session.breakpoints().is_empty());

        let commands = commands(&mut session);
        let [Command::Breakpoint(BreakpointCommand::Add(envelope))] = commands.as_slice() else {
            panic!("expected a single add command, got {commands:?}");
        };
        assert_eq!(envelope.error(), Some("no code at line 4"));
        assert_eq!(envelope.result(), None);
    }

    #[test]
    fn failed_remove_leaves_the_breakpoint_installed() {
        for disabled_only in [false, true] {
            let mut session = connected();
            let breakpoint = add_and_install(&mut session, 6);
            if disabled_only {
                session.disable_breakpoint(&breakpoint).unwrap();
            } else {
                session.remove_breakpoint(&breakpoint);
            }
            let request = next_request(&mut session);
            session.take_events();

            session.handle_response(request.id, Err(eyre::eyre!("debuggee busy")));
            assert_eq!(
                session.breakpoints().get(&breakpoint.original_location),
                Some(&breakpoint),
                "disabled_only = {disabled_only}"
            );
            let commands = commands(&mut session);
            let [Command::Breakpoint(BreakpointCommand::Remove(envelope))] = commands.as_slice() else {
                panic!("expected a single remove command, got {commands:?}");
            };
            assert_eq!(envelope.error(), Some("debuggee busy"));
        }
    }

    #[test]
    fn failed_enable_keeps_the_breakpoint_disabled() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 6);
        session.disable_breakpoint(&breakpoint).unwrap();
        let request = next_request(&mut session);
        session.handle_response(request.id, Ok(ResponseBody::Ack));
        let disabled = session
            .breakpoints()
            .get(&breakpoint.original_location)
            .unwrap()
            .clone();
        assert!(disabled.disabled);

        session.enable_breakpoint(&disabled).unwrap();
        let request = next_request(&mut session);
        assert!(matches!(request.body, RequestBody::SetBreakpoint { .. }));
        session.handle_response(request.id, Err(eyre::eyre!("no code at line 6")));

        assert_eq!(
            session.breakpoints().get(&breakpoint.original_location),
            Some(&disabled)
        );
        assert!(session.is_idle());
    }

    #[test]
    fn removing_a_missing_breakpoint_succeeds_without_a_request() {
        let mut session = connected();
        let command = session.remove_breakpoint(&Breakpoint::new(Location::new("s1", 7)));
        let BreakpointCommand::Remove(envelope) = command else {
            panic!("expected a remove command");
        };
        assert_eq!(envelope.phase, Phase::Succeeded(()));
        assert!(session.take_requests().is_empty());
    }

    #[test]
    fn disabled_breakpoints_are_removed_locally() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 3);

        session.disable_breakpoint(&breakpoint).unwrap();
        let request = next_request(&mut session);
        assert!(matches!(request.body, RequestBody::RemoveBreakpoint { .. }));
        session.handle_response(request.id, Ok(ResponseBody::Ack));
        let disabled = session.breakpoints().get(&breakpoint.original_location).unwrap();
        assert!(disabled.disabled);

        // already uninstalled, so no round trip
        let command = session.remove_breakpoint(&breakpoint);
        assert!(!command.is_pending());
        assert!(session.take_requests().is_empty());
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn commands_on_one_location_run_in_dispatch_order() {
        let mut session = connected();
        let location = Location::new("s1", 10);

        session.add_breakpoint(location.clone(), None).unwrap();
        let add = next_request(&mut session);

        let remove = session.remove_breakpoint(&Breakpoint::new(location.clone()));
        assert!(remove.is_pending());
        // waits for the add to finish
        assert!(session.take_requests().is_empty());
        assert!(!session.is_idle());

        session.handle_response(add.id, Ok(ResponseBody::Ack));
        let remove_request = next_request(&mut session);
        assert!(matches!(remove_request.body, RequestBody::RemoveBreakpoint { .. }));
        assert!(session.breakpoints().get(&location).is_some());

        session.handle_response(remove_request.id, Ok(ResponseBody::Ack));
        assert!(session.breakpoints().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn disable_all_is_one_transition() {
        let mut session = connected();
        add_and_install(&mut session, 1);
        add_and_install(&mut session, 2);
        session.take_events();

        let command = session.disable_all();
        assert!(command.is_pending());
        let request = next_request(&mut session);
        let RequestBody::ToggleBreakpoints {
            locations,
            should_disable,
        } = &request.body
        else {
            panic!("expected a toggle request, got {request:?}");
        };
        assert_eq!(locations.len(), 2);
        assert!(should_disable);

        // later breakpoint commands wait for the toggle
        let queued = session.add_breakpoint(Location::new("s1", 3), None).unwrap();
        assert!(queued.is_pending());
        assert!(session.take_requests().is_empty());
        assert!(session.breakpoints().iter().all(Breakpoint::is_active));
        session.take_events();

        session.handle_response(request.id, Ok(ResponseBody::Ack));
        assert!(session.breakpoints().iter().all(|bp| bp.disabled));
        let changes = session
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, Event::BreakpointsChanged))
            .count();
        assert_eq!(changes, 1);

        let add = next_request(&mut session);
        assert!(matches!(add.body, RequestBody::SetBreakpoint { .. }));
    }

    #[test]
    fn failed_toggle_changes_nothing() {
        let mut session = connected();
        add_and_install(&mut session, 1);
        session.disable_all();
        let request = next_request(&mut session);
        session.handle_response(request.id, Err(eyre::eyre!("connection reset")));
        assert!(session.breakpoints().iter().all(Breakpoint::is_active));
    }

    #[test]
    fn condition_survives_disabling() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 5);
        session
            .set_breakpoint_condition(&breakpoint, Some("n == 0".to_string()))
            .unwrap();

        session.toggle_disabled(&breakpoint).unwrap();
        let request = next_request(&mut session);
        session.handle_response(request.id, Ok(ResponseBody::Ack));

        let current = session.breakpoints().get(&breakpoint.original_location).unwrap().clone();
        assert!(current.disabled);
        assert_eq!(current.condition.as_deref(), Some("n == 0"));

        session.toggle_disabled(&current).unwrap();
        let request = next_request(&mut session);
        assert!(
            matches!(&request.body, RequestBody::SetBreakpoint { condition: Some(c), .. } if c == "n == 0")
        );
    }

    #[test]
    fn reprocessing_a_source_moves_breakpoints_but_keeps_identity() {
        let mut session = connected();
        let kept = add_and_install(&mut session, 10);
        let unmapped = add_and_install(&mut session, 20);
        session.take_events();

        session.handle_notification(Notification::SourceReprocessed {
            source_id: SourceId::new("s1"),
            mappings: vec![LocationMapping {
                from: Location::new("s1", 10),
                to: Some(Location::new("s1", 14)),
            }],
        });

        let moved = session.breakpoints().get(&kept.original_location).unwrap();
        assert_eq!(moved.location, Location::new("s1", 14));
        assert_eq!(moved.original_location, Location::new("s1", 10));

        let stayed = session.breakpoints().get(&unmapped.original_location).unwrap();
        assert_eq!(stayed.location, Location::new("s1", 20));
        let events = session.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::RemapWarning(warning) if warning.original_location == unmapped.original_location
        )));
    }

    #[test]
    fn synced_breakpoint_replaces_the_previous_one() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 8);

        session.handle_notification(Notification::BreakpointSynced {
            previous_location: breakpoint.original_location.clone(),
            breakpoint: Some(Breakpoint::new(Location::new("s2", 8))),
        });
        assert!(session.breakpoints().get(&breakpoint.original_location).is_none());
        assert!(session.breakpoints().get(&Location::new("s2", 8)).is_some());

        session.handle_notification(Notification::BreakpointSynced {
            previous_location: Location::new("s2", 8),
            breakpoint: None,
        });
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn sync_during_disable_all_is_applied_after_it() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 10);
        session.disable_all();
        let toggle = next_request(&mut session);

        session.handle_notification(Notification::BreakpointSynced {
            previous_location: breakpoint.original_location.clone(),
            breakpoint: Some(Breakpoint::new(Location::new("s1", 12))),
        });
        // waits for the toggle
        assert!(session.breakpoints().get(&breakpoint.original_location).is_some());
        assert!(!session.is_idle());

        session.handle_response(toggle.id, Ok(ResponseBody::Ack));
        assert!(session.breakpoints().get(&breakpoint.original_location).is_none());
        let synced = session.breakpoints().get(&Location::new("s1", 12)).unwrap();
        assert!(synced.disabled);
        assert_eq!(session.breakpoints().active().count(), 0);
        assert!(session.take_requests().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn pause_selects_a_frame_of_the_stack() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1", "f2"], &[])));

        assert_eq!(session.pause().selected_frame_id(), Some(&FrameId::new("f1")));
        assert_eq!(
            session.select_frame(&FrameId::new("f3")),
            Err(Rejection::UnknownFrame(FrameId::new("f3")))
        );
        assert_eq!(session.pause().selected_frame_id(), Some(&FrameId::new("f1")));

        session.select_frame(&FrameId::new("f2")).unwrap();
        // scopes of f2 did not come with the pause
        let request = next_request(&mut session);
        assert_eq!(
            request.body,
            RequestBody::Scopes {
                frame_id: FrameId::new("f2")
            }
        );
        session.handle_response(request.id, Ok(ResponseBody::Scopes(Scope::default())));
        let snapshot = session.pause().snapshot().unwrap();
        assert!(snapshot.scopes.contains_key(&FrameId::new("f2")));
    }

    #[test]
    fn pause_without_scopes_for_the_selected_frame_fetches_them() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused_at(&["f1", "f2"], "f2")));
        let request = next_request(&mut session);
        assert_eq!(
            request.body,
            RequestBody::Scopes {
                frame_id: FrameId::new("f2")
            }
        );

        let mut session = connected_with(SessionConfig {
            evaluate_on_pause: false,
            fetch_scopes_on_select: false,
            ..SessionConfig::default()
        });
        session.handle_notification(Notification::Paused(paused_at(&["f1", "f2"], "f2")));
        assert!(session.take_requests().is_empty());
    }

    #[test]
    fn resume_clears_the_snapshot_and_rejects_frame_selection() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1"], &[("a", json!(1))])));
        session
            .set_popup_object_properties("obj1", BTreeMap::from([("len".to_string(), json!(3))]))
            .unwrap();

        let envelope = session.resume().unwrap();
        assert!(envelope.is_pending());
        let request = next_request(&mut session);
        assert_eq!(request.body, RequestBody::Step(StepKind::Resume));
        session.take_events();

        session.handle_response(request.id, Ok(ResponseBody::Ack));
        assert!(!session.pause().is_paused());
        assert!(session.pause().snapshot().is_none());
        assert_eq!(
            session.select_frame(&FrameId::new("f1")),
            Err(Rejection::NotPaused)
        );

        let commands = commands(&mut session);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Pause(PauseCommand::Step(step)) if step.result() == Some(&StepOutcome::Running)
        )));
    }

    #[test]
    fn stepping_needs_a_paused_debuggee() {
        let mut session = connected();
        assert_eq!(session.step_over().unwrap_err(), Rejection::NotPaused);
        assert!(session.take_requests().is_empty());
    }

    #[test]
    fn step_completes_when_the_debuggee_pauses_again() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1"], &[])));
        session.step_in().unwrap();
        assert_eq!(
            session.step_over().unwrap_err(),
            Rejection::StepInFlight("step in")
        );

        let request = next_request(&mut session);
        session.handle_response(request.id, Ok(ResponseBody::Ack));
        assert!(!session.pause().is_paused());
        assert!(session.pause().in_flight_step().is_some());

        session.take_events();
        session.handle_notification(Notification::Paused(paused(&["g1", "f1"], &[])));
        assert!(session.pause().in_flight_step().is_none());
        let commands = commands(&mut session);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::Pause(PauseCommand::Step(step))
                if matches!(step.result(), Some(StepOutcome::Paused { .. }))
        )));
    }

    #[test]
    fn late_mapped_scopes_for_a_superseded_pause_are_discarded() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1", "f2"], &[])));
        let envelope = session.map_scopes(&FrameId::new("f2")).unwrap();
        let request = next_request(&mut session);

        session.handle_notification(Notification::Paused(paused(&["f1", "f2"], &[])));
        session.take_events();
        session.handle_response(request.id, Ok(ResponseBody::MappedScopes(MappedScopes::default())));

        assert!(session.pause().snapshot().unwrap().mapped_scopes.is_empty());
        assert_eq!(
            session.take_events(),
            vec![Event::Superseded {
                command: envelope.id
            }]
        );
    }

    #[test]
    fn batch_evaluation_preserves_order_and_isolates_failures() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1"], &[("a", json!(1))])));

        let inputs: Vec<String> = ["a+1", "bogus(", "2*2"].map(String::from).to_vec();
        session.evaluate_expressions(inputs.clone()).unwrap();
        let request = next_request(&mut session);
        assert_eq!(
            request.body,
            RequestBody::Evaluate {
                inputs,
                frame_id: Some(FrameId::new("f1")),
            }
        );
        session.take_events();

        session.handle_response(
            request.id,
            Ok(ResponseBody::Evaluated(vec![
                Ok(json!(2)),
                Err("SyntaxError: unexpected end of input".to_string()),
                Ok(json!(4)),
            ])),
        );

        let commands = commands(&mut session);
        let [Command::Expression(ExpressionCommand::EvaluateAll(envelope))] = commands.as_slice()
        else {
            panic!("expected one batch evaluation, got {commands:?}");
        };
        let results = envelope.result().unwrap();
        assert_eq!(results[0], Ok(json!(2)));
        assert!(results[1].is_err());
        assert_eq!(results[2], Ok(json!(4)));
    }

    #[test]
    fn evaluation_needs_a_connection() {
        let mut session = Session::new(SessionConfig::default());
        assert_eq!(
            session.add_expression("x").unwrap_err(),
            Rejection::NoActiveSession
        );
        assert!(session.expressions().is_empty());
    }

    #[test]
    fn result_for_a_previously_selected_frame_is_dropped() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1", "f2"], &[])));

        let envelope = session.add_expression("x").unwrap();
        let evaluate = next_request(&mut session);
        session.select_frame(&FrameId::new("f2")).unwrap();
        session.take_requests();
        session.take_events();

        session.handle_response(evaluate.id, Ok(ResponseBody::Evaluated(vec![Ok(json!(5))])));
        let expression = session.expressions().get("x").unwrap();
        assert_eq!(expression.value, None);
        assert!(expression.stale);
        assert_eq!(
            session.take_events(),
            vec![Event::Superseded {
                command: envelope.id
            }]
        );
    }

    #[test]
    fn watch_expressions_are_re_evaluated_on_pause() {
        let mut session = connected_with(SessionConfig::default());
        session.add_expression("a").unwrap();
        session.add_expression("b").unwrap();
        for request in session.take_requests() {
            session.handle_response(request.id, Ok(ResponseBody::Evaluated(vec![Ok(json!(0))])));
        }

        session.handle_notification(Notification::Paused(paused(&["f1"], &[])));
        assert!(session.expressions().iter().all(|e| e.value.is_none() && e.stale));
        let request = next_request(&mut session);
        assert!(matches!(
            &request.body,
            RequestBody::Evaluate { inputs, .. } if inputs == &["a".to_string(), "b".to_string()]
        ));

        session.handle_response(
            request.id,
            Ok(ResponseBody::Evaluated(vec![Ok(json!(1)), Err("ReferenceError: b".to_string())])),
        );
        let a = session.expressions().get("a").unwrap();
        assert_eq!(a.value, Some(json!(1)));
        assert!(!a.stale);
        let b = session.expressions().get("b").unwrap();
        assert_eq!(b.error.as_deref(), Some("ReferenceError: b"));
        assert_eq!(session.expressions().expression_error(), None);
    }

    #[test]
    fn failed_evaluation_request_sets_the_expression_error() {
        let mut session = connected();
        session.add_expression("a").unwrap();
        let request = next_request(&mut session);
        session.handle_response(request.id, Err(eyre::eyre!("timed out")));

        assert_eq!(session.expressions().expression_error(), Some("timed out"));
        assert_eq!(
            session.expressions().get("a").unwrap().error.as_deref(),
            Some("timed out")
        );
        session.clear_expression_error();
        assert_eq!(session.expressions().expression_error(), None);
    }

    #[test]
    fn symbols_are_loaded_once_per_source() {
        let mut session = connected();
        let source_id = SourceId::new("s1");

        let first = session.set_symbols(&source_id).unwrap();
        let second = session.set_symbols(&source_id).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.is_pending());
        let request = next_request(&mut session);

        session.handle_response(
            request.id,
            Ok(ResponseBody::Symbols(SymbolDeclarations::default())),
        );
        let third = session.set_symbols(&source_id).unwrap();
        assert_eq!(third.result(), Some(&SymbolDeclarations::default()));
        assert!(session.take_requests().is_empty());
    }

    #[test]
    fn navigation_keeps_breakpoints_and_resets_everything_else() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 10);
        session.set_symbols(&SourceId::new("s2")).unwrap();
        let symbols = next_request(&mut session);
        session.handle_notification(Notification::Paused(paused(&["f1"], &[])));
        session.select_source_url("http://localhost/s1.js", Some(10));

        session.handle_notification(Notification::Navigated {
            url: "http://localhost/next".to_string(),
        });
        assert!(!session.pause().is_paused());
        assert!(session.sources().is_empty());
        assert_eq!(
            session.sources().selection(),
            Some(&Selection::Pending {
                url: "http://localhost/s1.js".to_string(),
                line: Some(10),
            })
        );
        assert_eq!(session.breakpoints().len(), 1);

        let reinstall = next_request(&mut session);
        assert!(
            matches!(&reinstall.body, RequestBody::SetBreakpoint { location, .. } if *location == breakpoint.location)
        );
        session.handle_response(
            reinstall.id,
            Ok(ResponseBody::BreakpointSet {
                actual_location: Location::new("s1", 11),
            }),
        );
        let moved = session.breakpoints().get(&breakpoint.original_location).unwrap();
        assert_eq!(moved.location, Location::new("s1", 11));

        // abandoned symbol load
        session.take_events();
        session.handle_response(symbols.id, Ok(ResponseBody::Symbols(SymbolDeclarations::default())));
        assert!(matches!(
            session.take_events().as_slice(),
            [Event::Superseded { .. }]
        ));
    }

    #[test]
    fn remove_in_flight_across_navigation_is_not_reinstalled() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 10);
        session.remove_breakpoint(&breakpoint);
        let remove = next_request(&mut session);

        navigate(&mut session);
        // the re-install waits for the remove
        assert!(session.take_requests().is_empty());

        session.handle_response(remove.id, Ok(ResponseBody::Ack));
        assert!(session.breakpoints().is_empty());
        assert!(session.take_requests().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn add_in_flight_across_navigation_is_installed_on_the_new_target() {
        let mut session = connected();
        let location = Location::new("s1", 10);
        session.add_breakpoint(location.clone(), None).unwrap();
        let add = next_request(&mut session);

        navigate(&mut session);
        assert!(session.take_requests().is_empty());

        session.handle_response(add.id, Ok(ResponseBody::Ack));
        let reinstall = next_request(&mut session);
        assert!(
            matches!(&reinstall.body, RequestBody::SetBreakpoint { location: l, .. } if *l == location)
        );
        session.handle_response(reinstall.id, Ok(ResponseBody::Ack));
        assert_eq!(session.breakpoints().active().count(), 1);
        assert!(session.is_idle());
    }

    #[test]
    fn disable_all_in_flight_across_navigation_is_not_reinstalled() {
        let mut session = connected();
        add_and_install(&mut session, 1);
        add_and_install(&mut session, 2);
        session.disable_all();
        let toggle = next_request(&mut session);

        navigate(&mut session);
        assert!(session.take_requests().is_empty());

        session.handle_response(toggle.id, Ok(ResponseBody::Ack));
        assert!(session.breakpoints().iter().all(|bp| bp.disabled));
        assert!(session.take_requests().is_empty());
        assert!(session.is_idle());
    }

    #[test]
    fn failed_reinstall_keeps_the_last_known_location() {
        let mut session = connected();
        let breakpoint = add_and_install(&mut session, 10);
        navigate(&mut session);
        let reinstall = next_request(&mut session);
        session.take_events();

        session.handle_response(reinstall.id, Err(eyre::eyre!("source not loaded")));
        assert_eq!(
            session.breakpoints().get(&breakpoint.original_location),
            Some(&breakpoint)
        );
        let events = session.take_events();
        let [Event::RemapWarning(warning)] = events.as_slice() else {
            panic!("expected a remap warning, got {events:?}");
        };
        assert_eq!(warning.original_location, breakpoint.original_location);
        assert_eq!(warning.kept_location.as_ref(), Some(&breakpoint.location));
        assert_eq!(warning.reason, "source not loaded");
        assert!(session.is_idle());
    }

    #[test]
    fn preview_is_evaluated_in_the_selected_frame_and_cleared_on_resume() {
        let mut session = connected();
        assert_eq!(
            session.set_preview("count", hovered()).unwrap_err(),
            Rejection::NotPaused
        );

        session.handle_notification(Notification::Paused(paused(&["f1"], &[("count", json!(3))])));
        let envelope = session.set_preview("count", hovered()).unwrap();
        assert!(envelope.is_pending());
        let request = next_request(&mut session);
        assert_eq!(
            request.body,
            RequestBody::Evaluate {
                inputs: vec!["count".to_string()],
                frame_id: Some(FrameId::new("f1")),
            }
        );
        session.handle_response(request.id, Ok(ResponseBody::Evaluated(vec![Ok(json!(3))])));
        let preview = session.view().preview.unwrap();
        assert_eq!(preview.expression, "count");
        assert_eq!(preview.location, hovered());
        assert_eq!(preview.result, json!(3));

        session.resume().unwrap();
        let resume = next_request(&mut session);
        session.handle_response(resume.id, Ok(ResponseBody::Ack));
        assert!(session.symbols().preview().is_none());
        assert_eq!(session.view().preview, None);
    }

    #[test]
    fn preview_for_a_previously_selected_frame_is_dropped() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1", "f2"], &[])));
        let envelope = session.set_preview("count", hovered()).unwrap();
        let request = next_request(&mut session);

        session.select_frame(&FrameId::new("f2")).unwrap();
        assert!(session.symbols().preview().is_none());
        session.take_requests();
        session.take_events();

        session.handle_response(request.id, Ok(ResponseBody::Evaluated(vec![Ok(json!(3))])));
        assert!(session.symbols().preview().is_none());
        assert_eq!(
            session.take_events(),
            vec![Event::Superseded {
                command: envelope.id
            }]
        );
    }

    #[test]
    fn clearing_the_selection_drops_the_preview() {
        let mut session = connected();
        session.handle_notification(Notification::Paused(paused(&["f1"], &[])));
        session.set_preview("missing", hovered()).unwrap();
        let request = next_request(&mut session);
        session.handle_response(
            request.id,
            Ok(ResponseBody::Evaluated(vec![Err("ReferenceError: missing".to_string())])),
        );
        let failed = session.symbols().preview().unwrap();
        assert_eq!(failed.error(), Some("ReferenceError: missing"));
        session.take_events();

        session.clear_selection();
        assert!(session.symbols().preview().is_none());
        assert_eq!(session.take_events(), vec![Event::PreviewChanged]);
        // nothing to clear
        session.clear_selection();
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn black_boxing_flips_on_success() {
        let mut session = connected();
        let source_id = SourceId::new("s2");
        session.toggle_black_box(&source_id).unwrap();
        let request = next_request(&mut session);
        assert_eq!(
            request.body,
            RequestBody::BlackBox {
                source_id: source_id.clone(),
                black_boxed: true
            }
        );
        session.handle_response(request.id, Ok(ResponseBody::Ack));
        assert!(session.sources().get(&source_id).unwrap().is_black_boxed);
    }

    #[test]
    fn analysis_results_are_stored() {
        let mut session = connected();
        session.handle_notification(Notification::Analysis(Analysis::InScopeLines {
            lines: vec![1, 2, 5],
        }));
        session.handle_notification(Notification::Analysis(Analysis::OutOfScopeLocations {
            locations: Some(Vec::new()),
        }));
        session.handle_notification(Notification::Analysis(Analysis::SourceMetadata {
            source_id: SourceId::new("s1"),
            metadata: SourceMetadata {
                framework: Some("React".to_string()),
            },
        }));

        let view = session.view();
        assert_eq!(view.in_scope_lines, vec![1, 2, 5]);
        assert_eq!(view.out_of_scope_locations, Some(Vec::new()));
        let s1 = view.sources.iter().find(|s| s.id == SourceId::new("s1")).unwrap();
        assert_eq!(
            s1.metadata.as_ref().and_then(|m| m.framework.as_deref()),
            Some("React")
        );
    }

    #[test]
    fn travelling_replaces_snapshot_and_results() {
        let mut session = connected();
        session.add_expression("a").unwrap();
        session.take_requests();

        session.handle_notification(Notification::TravelTo {
            position: 3,
            paused: paused(&["t1"], &[]),
            expressions: vec![("a".to_string(), Ok(json!(7)))],
        });
        assert_eq!(session.pause().history_position(), Some(3));
        assert_eq!(session.pause().selected_frame_id(), Some(&FrameId::new("t1")));
        assert_eq!(session.expressions().get("a").unwrap().value, Some(json!(7)));

        session.handle_notification(Notification::ClearHistory);
        assert_eq!(session.pause().history_position(), None);
    }
}
