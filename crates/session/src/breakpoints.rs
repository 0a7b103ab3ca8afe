//! Breakpoint registry.
//!
//! Breakpoints are keyed by their original location, the location the user
//! asked for. The installed `location` may diverge from it after the debuggee
//! corrects it or after the source is reprocessed, but identity never changes.
//!
//! The registry also schedules breakpoint commands: commands that touch the same
//! original location run one at a time in dispatch order, and a bulk toggle
//! waits for (and blocks) every other breakpoint command. Re-installs after a
//! navigation and breakpoint syncs go through the same queue.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    command::BreakpointCommand,
    error::Rejection,
    location::{Location, SourceId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Where the breakpoint is installed
    pub location: Location,
    /// Where the user set the breakpoint
    pub original_location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Message logged instead of pausing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_value: Option<String>,
}

impl Breakpoint {
    pub fn new(location: Location) -> Self {
        Self {
            original_location: location.clone(),
            location,
            condition: None,
            disabled: false,
            log_value: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.disabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBreakpoint {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBreakpointResult {
    /// The location the command asked for
    pub previous_location: Location,
    pub breakpoint: Breakpoint,
}

impl AddBreakpointResult {
    /// True when the debuggee installed the breakpoint somewhere other than requested
    pub fn was_moved(&self) -> bool {
        self.previous_location != self.breakpoint.location
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveBreakpoint {
    pub breakpoint: Breakpoint,
    pub disabled_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleBreakpoints {
    pub should_disable: bool,
}

/// A breakpoint whose location could not be remapped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemapWarning {
    pub original_location: Location,
    pub kept_location: Option<Location>,
    pub reason: String,
}

/// What a breakpoint command locks while it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    One(Location),
    All,
}

impl Target {
    fn overlaps(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::One(a), Target::One(b)) => a == b,
            _ => true,
        }
    }
}

impl BreakpointCommand {
    pub(crate) fn target(&self) -> Target {
        match self {
            BreakpointCommand::Add(e) => Target::One(e.payload.location.clone()),
            BreakpointCommand::Remove(e) => {
                Target::One(e.payload.breakpoint.original_location.clone())
            }
            BreakpointCommand::Enable(e) => Target::One(e.payload.original_location.clone()),
            BreakpointCommand::ToggleAll(_) => Target::All,
        }
    }
}

/// Work that touches the registry and has to wait for conflicting commands
#[derive(Debug, Clone)]
pub(crate) enum Job {
    Command(BreakpointCommand),
    /// Install the breakpoint at this original location on the current target, if still active
    Reinstall(Location),
    /// Replace the breakpoint at `previous_location` with its re-resolved form
    Sync {
        previous_location: Location,
        breakpoint: Option<Breakpoint>,
    },
}

impl Job {
    pub(crate) fn target(&self) -> Target {
        match self {
            Job::Command(command) => command.target(),
            Job::Reinstall(location) => Target::One(location.clone()),
            Job::Sync {
                previous_location, ..
            } => Target::One(previous_location.clone()),
        }
    }
}

/// Orders breakpoint jobs so that conflicting ones run in dispatch order
#[derive(Debug, Default)]
struct Scheduler {
    busy: HashSet<Location>,
    bulk: bool,
    waiting: VecDeque<Job>,
}

impl Scheduler {
    fn blocked<'a>(&self, target: &Target, mut ahead: impl Iterator<Item = &'a Job>) -> bool {
        if self.bulk {
            return true;
        }
        let locked = match target {
            Target::All => !self.busy.is_empty(),
            Target::One(location) => self.busy.contains(location),
        };
        locked || ahead.any(|job| job.target().overlaps(target))
    }

    fn occupy(&mut self, target: &Target) {
        match target {
            Target::All => self.bulk = true,
            Target::One(location) => {
                self.busy.insert(location.clone());
            }
        }
    }

    fn admit(&mut self, job: Job) -> Option<Job> {
        let target = job.target();
        if self.blocked(&target, self.waiting.iter()) {
            tracing::debug!(?target, "breakpoint job queued");
            self.waiting.push_back(job);
            return None;
        }
        self.occupy(&target);
        Some(job)
    }

    fn finish(&mut self, target: &Target) -> Vec<Job> {
        match target {
            Target::All => self.bulk = false,
            Target::One(location) => {
                self.busy.remove(location);
            }
        }
        self.ready()
    }

    /// Put `jobs` ahead of everything waiting
    fn prepend(&mut self, jobs: Vec<Job>) -> Vec<Job> {
        for job in jobs.into_iter().rev() {
            self.waiting.push_front(job);
        }
        self.ready()
    }

    /// Take every waiting job that no longer conflicts with a running or earlier one
    fn ready(&mut self) -> Vec<Job> {
        let mut ready = Vec::new();
        let mut still_waiting = VecDeque::with_capacity(self.waiting.len());
        while let Some(job) = self.waiting.pop_front() {
            let target = job.target();
            if self.blocked(&target, still_waiting.iter()) {
                still_waiting.push_back(job);
            } else {
                self.occupy(&target);
                ready.push(job);
            }
        }
        self.waiting = still_waiting;
        ready
    }
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<Location, Breakpoint>,
    scheduler: Scheduler,
    /// Original locations a running bulk toggle applies to
    toggling: Vec<Location>,
}

impl BreakpointRegistry {
    /// Look a breakpoint up by the location the user set it at
    pub fn get(&self, original_location: &Location) -> Option<&Breakpoint> {
        self.breakpoints.get(original_location)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Breakpoints currently installed in `source_id`
    pub fn for_source<'a>(
        &'a self,
        source_id: &'a SourceId,
    ) -> impl Iterator<Item = &'a Breakpoint> + 'a {
        self.breakpoints
            .values()
            .filter(move |bp| &bp.location.source_id == source_id)
    }

    /// Breakpoints currently installed against the debuggee
    pub fn active(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values().filter(|bp| bp.is_active())
    }

    /// Number of breakpoint commands waiting behind a conflicting one
    pub fn queued(&self) -> usize {
        self.scheduler.waiting.len()
    }

    /// Hand back a job that may run now, or queue it behind conflicting ones
    pub(crate) fn admit(&mut self, job: Job) -> Option<Job> {
        self.scheduler.admit(job)
    }

    /// Release what a finished job held, returning the jobs that may run now
    pub(crate) fn finish(&mut self, target: &Target) -> Vec<Job> {
        self.scheduler.finish(target)
    }

    /// Queue a re-install of every breakpoint against a new target.
    ///
    /// Re-installs run ahead of queued commands. A location with a command in
    /// flight is re-installed once that command settles, from whatever the
    /// registry holds by then, so a breakpoint being removed is not installed
    /// and one being added is.
    pub(crate) fn reinstall_all(&mut self) -> Vec<Job> {
        let locations: BTreeSet<Location> = self
            .breakpoints
            .keys()
            .chain(self.scheduler.busy.iter())
            .cloned()
            .collect();
        self.scheduler
            .waiting
            .retain(|job| !matches!(job, Job::Reinstall(_)));
        self.scheduler
            .prepend(locations.into_iter().map(Job::Reinstall).collect())
    }

    pub(crate) fn insert_added(
        &mut self,
        request: &AddBreakpoint,
        installed_at: Location,
    ) -> AddBreakpointResult {
        let breakpoint = Breakpoint {
            location: installed_at,
            original_location: request.location.clone(),
            condition: request.condition.clone(),
            disabled: false,
            log_value: request.log_value.clone(),
        };
        tracing::debug!(
            original = %breakpoint.original_location,
            installed = %breakpoint.location,
            "breakpoint added"
        );
        self.breakpoints
            .insert(breakpoint.original_location.clone(), breakpoint.clone());
        AddBreakpointResult {
            previous_location: request.location.clone(),
            breakpoint,
        }
    }

    pub(crate) fn remove(&mut self, original_location: &Location) -> Option<Breakpoint> {
        self.breakpoints.remove(original_location)
    }

    /// Mark a breakpoint enabled, optionally at a corrected installed location
    pub(crate) fn set_enabled(
        &mut self,
        original_location: &Location,
        installed_at: Option<Location>,
    ) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(original_location)?;
        breakpoint.disabled = false;
        if let Some(location) = installed_at {
            breakpoint.location = location;
        }
        Some(breakpoint.clone())
    }

    pub(crate) fn set_disabled(&mut self, original_location: &Location) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(original_location)?;
        breakpoint.disabled = true;
        Some(breakpoint.clone())
    }

    pub(crate) fn set_condition(
        &mut self,
        original_location: &Location,
        condition: Option<String>,
    ) -> Result<Breakpoint, Rejection> {
        let breakpoint = self
            .breakpoints
            .get_mut(original_location)
            .ok_or_else(|| Rejection::UnknownBreakpoint(original_location.clone()))?;
        breakpoint.condition = condition;
        Ok(breakpoint.clone())
    }

    /// Fix the breakpoints a bulk toggle applies to, returning their installed locations
    pub(crate) fn begin_toggle(&mut self, should_disable: bool) -> Vec<Location> {
        let (affected, installed) = self
            .breakpoints
            .values()
            .filter(|bp| bp.disabled != should_disable)
            .map(|bp| (bp.original_location.clone(), bp.location.clone()))
            .unzip();
        self.toggling = affected;
        installed
    }

    /// Flip every breakpoint fixed by [`Self::begin_toggle`] in one step
    pub(crate) fn complete_toggle(&mut self, should_disable: bool) -> Vec<Breakpoint> {
        std::mem::take(&mut self.toggling)
            .iter()
            .filter_map(|location| {
                let breakpoint = self.breakpoints.get_mut(location)?;
                breakpoint.disabled = should_disable;
                Some(breakpoint.clone())
            })
            .collect()
    }

    pub(crate) fn abandon_toggle(&mut self) {
        self.toggling.clear();
    }

    /// Move breakpoints to new installed locations without touching their identity
    pub(crate) fn remap(
        &mut self,
        breakpoints: impl IntoIterator<Item = Breakpoint>,
    ) -> Vec<RemapWarning> {
        let mut warnings = Vec::new();
        for remapped in breakpoints {
            match self.breakpoints.get_mut(&remapped.original_location) {
                Some(existing) => {
                    tracing::debug!(
                        original = %existing.original_location,
                        from = %existing.location,
                        to = %remapped.location,
                        "breakpoint remapped"
                    );
                    existing.location = remapped.location;
                }
                None => warnings.push(RemapWarning {
                    original_location: remapped.original_location,
                    kept_location: None,
                    reason: "no breakpoint registered at this location".to_string(),
                }),
            }
        }
        warnings
    }

    /// Replace the breakpoint previously found at `previous_location` with its re-resolved form.
    ///
    /// The replacement keeps the enabled state of the breakpoint it replaces.
    pub(crate) fn sync(&mut self, previous_location: &Location, breakpoint: Option<Breakpoint>) {
        let previous = self.breakpoints.remove(previous_location);
        if let Some(mut breakpoint) = breakpoint {
            if let Some(previous) = previous {
                breakpoint.disabled = previous.disabled;
            }
            self.breakpoints
                .insert(breakpoint.original_location.clone(), breakpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandEnvelope, CommandId};

    fn add_command(id: u64, line: u32) -> Job {
        Job::Command(BreakpointCommand::Add(CommandEnvelope::pending(
            CommandId(id),
            AddBreakpoint {
                location: Location::new("s1", line),
                condition: None,
                log_value: None,
            },
        )))
    }

    fn toggle_command(id: u64) -> Job {
        Job::Command(BreakpointCommand::ToggleAll(CommandEnvelope::pending(
            CommandId(id),
            ToggleBreakpoints {
                should_disable: true,
            },
        )))
    }

    fn ids(jobs: &[Job]) -> Vec<Option<CommandId>> {
        jobs.iter()
            .map(|job| match job {
                Job::Command(command) => Some(command.id()),
                _ => None,
            })
            .collect()
    }

    fn install(registry: &mut BreakpointRegistry, line: u32) -> Location {
        let location = Location::new("s1", line);
        registry.insert_added(
            &AddBreakpoint {
                location: location.clone(),
                condition: None,
                log_value: None,
            },
            location.clone(),
        );
        location
    }

    #[test]
    fn commands_on_the_same_location_run_in_dispatch_order() {
        let mut registry = BreakpointRegistry::default();

        assert!(registry.admit(add_command(1, 10)).is_some());
        assert!(registry.admit(add_command(2, 10)).is_none());
        // a different location is independent
        assert!(registry.admit(add_command(3, 11)).is_some());
        assert_eq!(registry.queued(), 1);

        let ready = registry.finish(&Target::One(Location::new("s1", 10)));
        assert_eq!(ids(&ready), vec![Some(CommandId(2))]);
        assert_eq!(registry.queued(), 0);
    }

    #[test]
    fn bulk_toggle_waits_for_in_flight_commands_and_blocks_later_ones() {
        let mut registry = BreakpointRegistry::default();

        assert!(registry.admit(add_command(1, 10)).is_some());
        assert!(registry.admit(toggle_command(2)).is_none());
        // dispatched after the toggle, so it must wait for it
        assert!(registry.admit(add_command(3, 20)).is_none());

        let ready = registry.finish(&Target::One(Location::new("s1", 10)));
        assert_eq!(ids(&ready), vec![Some(CommandId(2))]);

        let ready = registry.finish(&Target::All);
        assert_eq!(ids(&ready), vec![Some(CommandId(3))]);
    }

    #[test]
    fn reinstall_waits_for_the_command_in_flight_on_its_location() {
        let mut registry = BreakpointRegistry::default();
        let installed = install(&mut registry, 10);

        // an add for line 20 is in flight, a second command on line 10 is queued
        assert!(registry.admit(add_command(1, 20)).is_some());
        assert!(registry.admit(add_command(2, 10)).is_some());
        assert!(registry.admit(add_command(3, 10)).is_none());

        // line 20 is not registered yet but still gets a re-install
        let ready = registry.reinstall_all();
        assert!(ready.is_empty());
        assert_eq!(registry.queued(), 3);

        let ready = registry.finish(&Target::One(Location::new("s1", 20)));
        assert!(matches!(&ready[..], [Job::Reinstall(l)] if l == &Location::new("s1", 20)));

        // the re-install goes ahead of the command queued before navigation
        let ready = registry.finish(&Target::One(installed.clone()));
        assert!(matches!(&ready[..], [Job::Reinstall(l)] if l == &installed));
        let ready = registry.finish(&Target::One(installed));
        assert_eq!(ids(&ready), vec![Some(CommandId(3))]);
    }

    #[test]
    fn sync_waits_for_a_running_bulk_toggle() {
        let mut registry = BreakpointRegistry::default();
        let previous = install(&mut registry, 10);

        assert!(registry.admit(toggle_command(1)).is_some());
        registry.begin_toggle(true);
        let sync = Job::Sync {
            previous_location: previous.clone(),
            breakpoint: Some(Breakpoint::new(Location::new("s1", 12))),
        };
        assert!(registry.admit(sync).is_none());

        registry.complete_toggle(true);
        let ready = registry.finish(&Target::All);
        let [Job::Sync { previous_location, breakpoint }] = &ready[..] else {
            panic!("expected the sync to be released, got {ready:?}");
        };
        registry.sync(previous_location, breakpoint.clone());

        let synced = registry.get(&Location::new("s1", 12)).unwrap();
        assert!(synced.disabled);
        assert_eq!(registry.active().count(), 0);
    }

    #[test]
    fn remap_changes_location_but_not_identity() {
        let mut registry = BreakpointRegistry::default();
        let request = AddBreakpoint {
            location: Location::new("s1", 10),
            condition: Some("x > 1".to_string()),
            log_value: None,
        };
        registry.insert_added(&request, Location::new("s1", 10));

        let mut moved = registry.get(&Location::new("s1", 10)).unwrap().clone();
        moved.location = Location::new("s1", 12);
        let warnings = registry.remap([moved]);
        assert!(warnings.is_empty());

        let breakpoint = registry.get(&Location::new("s1", 10)).unwrap();
        assert_eq!(breakpoint.location.line, 12);
        assert_eq!(breakpoint.original_location.line, 10);
        assert_eq!(breakpoint.condition.as_deref(), Some("x > 1"));
    }

    #[test]
    fn remap_of_unknown_breakpoint_is_a_warning() {
        let mut registry = BreakpointRegistry::default();
        let warnings = registry.remap([Breakpoint::new(Location::new("s1", 3))]);
        assert_eq!(warnings.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn disabled_breakpoint_keeps_its_condition() {
        let mut registry = BreakpointRegistry::default();
        let location = install(&mut registry, 4);
        registry
            .set_condition(&location, Some("i == 3".to_string()))
            .unwrap();
        let disabled = registry.set_disabled(&location).unwrap();
        assert!(!disabled.is_active());
        assert_eq!(disabled.condition.as_deref(), Some("i == 3"));
        assert_eq!(registry.active().count(), 0);
    }
}
