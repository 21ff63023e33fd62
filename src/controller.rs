//! Sync controller: owns the source text and the visual model of the open
//! profile and keeps them in agreement.
//!
//! ## States
//!
//! - `Clean`: text and model agree, nothing pending.
//! - `EditingText`: a keystroke armed the debounce deadline.
//! - `Parsing`: the deadline fired and a [`ParseTicket`] is outstanding.
//! - `Error`: the last parse failed; the last good model is still shown.
//! - `EditingVisual` / `Serializing`: transient while a visual edit is applied.
//!
//! Time is passed in by the caller, so the controller never sleeps or spawns.
//! A host event loop calls [`SyncController::poll`] (or
//! [`SyncController::run_due`]) whenever [`SyncController::deadline`] passes.
//!
//! Parse results are matched to the text they were issued for by revision and
//! by generation (bumped on profile switch and close). A result for anything
//! but the current revision of the current generation is dropped.

use crate::ast::Ast;
use crate::config::EngineConfig;
use crate::devices::{DeviceInfo, DeviceRegistry};
use crate::diagnostics::{self, CheckOptions, Diagnostic, DiagnosticSet};
use crate::error::{SerializeError, SyncError};
use crate::project::{project, rebind};
use crate::serialize::serialize;
use crate::storage::{LoadedConfig, ProfileStore};
use crate::visual::{Scope, VisualEdit, VisualModel};
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Clean,
    EditingText,
    Parsing,
    Error,
    EditingVisual,
    Serializing,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Clean => "clean",
            SyncState::EditingText => "editing-text",
            SyncState::Parsing => "parsing",
            SyncState::Error => "error",
            SyncState::EditingVisual => "editing-visual",
            SyncState::Serializing => "serializing",
        };
        f.write_str(name)
    }
}

/// Outcome of a parse: the AST with its non-blocking diagnostics, or the
/// blocking diagnostics.
pub type ParseResult = Result<(Ast, DiagnosticSet), DiagnosticSet>;

/// Parse-and-validate backend.
pub trait ConfigParser {
    fn parse(&self, source: &str, options: CheckOptions) -> ParseResult;
}

/// The DSL parser plus semantic validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DslParser;

impl ConfigParser for DslParser {
    fn parse(&self, source: &str, options: CheckOptions) -> ParseResult {
        diagnostics::check(source, options)
    }
}

impl<P: ConfigParser + ?Sized> ConfigParser for Rc<P> {
    fn parse(&self, source: &str, options: CheckOptions) -> ParseResult {
        (**self).parse(source, options)
    }
}

/// A parse the controller wants run, tagged with what it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTicket {
    pub revision: u64,
    pub generation: u64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// New AST and model are live.
    Applied,
    /// Diagnostics replaced; the previous model is kept.
    Failed,
    /// Superseded by a newer edit, profile switch or close; ignored.
    Stale,
}

pub struct SyncController<P: ConfigParser = DslParser> {
    config: EngineConfig,
    parser: P,
    profile: Option<String>,
    hash: String,
    source: String,
    saved_source: String,
    /// Last AST that parsed and validated without blocking errors.
    ast: Ast,
    model: VisualModel,
    diagnostics: DiagnosticSet,
    devices: Vec<DeviceInfo>,
    state: SyncState,
    /// Bumped on every change of `source`.
    revision: u64,
    /// Revision whose parse result (or serialization) is live.
    applied_revision: u64,
    /// Bumped on profile switch and close.
    generation: u64,
    deadline: Option<Instant>,
    in_flight: Option<u64>,
    last_saved: Option<Instant>,
}

impl SyncController<DslParser> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parser(config, DslParser)
    }
}

impl<P: ConfigParser> SyncController<P> {
    pub fn with_parser(config: EngineConfig, parser: P) -> Self {
        SyncController {
            config,
            parser,
            profile: None,
            hash: String::new(),
            source: String::new(),
            saved_source: String::new(),
            ast: Ast::default(),
            model: VisualModel::default(),
            diagnostics: DiagnosticSet::default(),
            devices: Vec::new(),
            state: SyncState::Clean,
            revision: 0,
            applied_revision: 0,
            generation: 0,
            deadline: None,
            in_flight: None,
            last_saved: None,
        }
    }

    fn transition(&mut self, to: SyncState, reason: &'static str) {
        if self.state != to {
            tracing::debug!(from = %self.state, to = %to, reason, revision = self.revision, "sync state");
        }
        self.state = to;
    }

    fn options(&self) -> CheckOptions {
        self.config.check_options()
    }

    /// Load `profile` and the current device list, replacing everything.
    pub fn open(
        &mut self,
        store: &dyn ProfileStore,
        profile: &str,
        registry: &dyn DeviceRegistry,
    ) -> Result<(), SyncError> {
        let loaded = store.load_config(profile)?;
        let devices = registry.list_devices().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "device registry unavailable; treating all devices as disconnected");
            Vec::new()
        });
        self.reset(profile, loaded, devices);
        Ok(())
    }

    /// Hard reset to freshly loaded text: cancels the debounce and makes any
    /// outstanding ticket stale.
    pub fn reset(&mut self, profile: &str, loaded: LoadedConfig, devices: Vec<DeviceInfo>) {
        self.generation += 1;
        self.revision += 1;
        self.deadline = None;
        self.in_flight = None;
        self.profile = Some(profile.to_string());
        self.hash = loaded.hash;
        self.saved_source = loaded.source.clone();
        self.source = loaded.source;
        self.devices = devices;
        self.applied_revision = self.revision;

        match self.parser.parse(&self.source, self.options()) {
            Ok((ast, diagnostics)) => {
                self.model = project(&ast, &self.devices);
                self.ast = ast;
                self.diagnostics = diagnostics;
                self.state = SyncState::Clean;
            }
            Err(diagnostics) => {
                self.ast = Ast::default();
                self.model = project(&self.ast, &self.devices);
                self.diagnostics = diagnostics;
                self.state = SyncState::Error;
            }
        }
        tracing::info!(
            profile,
            generation = self.generation,
            state = %self.state,
            diagnostics = self.diagnostics.len(),
            "profile loaded"
        );
    }

    /// Forget the open profile. Outstanding tickets become stale.
    pub fn close(&mut self) {
        self.generation += 1;
        self.revision += 1;
        self.applied_revision = self.revision;
        self.deadline = None;
        self.in_flight = None;
        self.profile = None;
        self.hash.clear();
        self.source.clear();
        self.saved_source.clear();
        self.ast = Ast::default();
        self.model = VisualModel::default();
        self.diagnostics = DiagnosticSet::default();
        self.transition(SyncState::Clean, "closed");
    }

    /// A keystroke: replace the text and restart the debounce window.
    pub fn edit_text(&mut self, source: impl Into<String>, now: Instant) {
        let source = source.into();
        if source == self.source && self.deadline.is_none() && self.in_flight.is_none() {
            return;
        }
        self.source = source;
        self.revision += 1;
        self.deadline = Some(now + self.config.debounce());
        self.transition(SyncState::EditingText, "keystroke");
    }

    /// When the pending parse becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Issue a ticket for the current text once the debounce window has
    /// passed.
    pub fn poll(&mut self, now: Instant) -> Option<ParseTicket> {
        match self.deadline {
            Some(due) if now >= due => Some(self.issue()),
            _ => None,
        }
    }

    fn issue(&mut self) -> ParseTicket {
        self.deadline = None;
        self.in_flight = Some(self.revision);
        self.transition(SyncState::Parsing, "debounce elapsed");
        ParseTicket {
            revision: self.revision,
            generation: self.generation,
            source: self.source.clone(),
        }
    }

    pub fn is_stale(&self, ticket: &ParseTicket) -> bool {
        ticket.generation != self.generation
            || ticket.revision != self.revision
            || ticket.revision <= self.applied_revision
    }

    /// Deliver the result for `ticket`, in whatever order results arrive.
    pub fn complete_parse(&mut self, ticket: &ParseTicket, result: ParseResult) -> ParseOutcome {
        if self.is_stale(ticket) {
            tracing::debug!(
                revision = ticket.revision,
                generation = ticket.generation,
                current = self.revision,
                "dropping stale parse result"
            );
            if self.in_flight == Some(ticket.revision) && ticket.generation == self.generation {
                self.in_flight = None;
            }
            return ParseOutcome::Stale;
        }
        self.in_flight = None;
        self.applied_revision = ticket.revision;
        match result {
            Ok((ast, diagnostics)) => {
                let mut model = project(&ast, &self.devices);
                model.restore_selection(&self.model);
                self.model = model;
                self.ast = ast;
                self.diagnostics = diagnostics;
                self.transition(SyncState::Clean, "parse succeeded");
                ParseOutcome::Applied
            }
            Err(diagnostics) => {
                self.diagnostics = diagnostics;
                self.transition(SyncState::Error, "parse failed");
                ParseOutcome::Failed
            }
        }
    }

    /// Poll and, if a ticket is due, parse it with the configured backend.
    pub fn run_due(&mut self, now: Instant) -> Option<ParseOutcome> {
        let ticket = self.poll(now)?;
        Some(self.run(ticket))
    }

    fn run(&mut self, ticket: ParseTicket) -> ParseOutcome {
        let result = self.parser.parse(&ticket.source, self.options());
        self.complete_parse(&ticket, result)
    }

    /// Parse pending text now, whether or not the debounce window has passed.
    pub fn flush(&mut self) -> Option<ParseOutcome> {
        let pending = self.deadline.is_some() || self.in_flight == Some(self.revision);
        if !pending || self.applied_revision == self.revision {
            return None;
        }
        let ticket = self.issue();
        Some(self.run(ticket))
    }

    fn text_pending(&self) -> bool {
        self.deadline.is_some() || self.in_flight.is_some()
    }

    /// Apply a content edit from the visual editor and regenerate the text.
    /// Refused while typed text has not been parsed, or does not parse, so
    /// typing is never overwritten.
    pub fn apply_visual_edit(&mut self, edit: VisualEdit) -> Result<(), SyncError> {
        if self.profile.is_none() {
            return Err(SyncError::NoProfile);
        }
        if self.text_pending() {
            return Err(SyncError::TextPending);
        }
        if self.state == SyncState::Error || self.diagnostics.has_blocking_errors() {
            return Err(SyncError::SourceInvalid(self.diagnostics.error_count().max(1)));
        }

        self.transition(SyncState::EditingVisual, "visual edit");
        let mut next = self.model.clone();
        let is_device_edit = matches!(edit, VisualEdit::AddDevice { .. });
        if let Err(e) = next.apply(edit) {
            self.transition(SyncState::Clean, "visual edit rejected");
            return Err(e.into());
        }
        if is_device_edit {
            rebind(&mut next, &self.devices);
        }

        self.transition(SyncState::Serializing, "model changed");
        let serialized = match serialize(&next, &self.ast) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "serializer refused a visual model");
                self.transition(SyncState::Clean, "serialization failed");
                return Err(e.into());
            }
        };
        let diagnostics = diagnostics::analyze(&serialized.ast, &serialized.source, self.options());
        if let Some(first) = diagnostics.errors().next() {
            tracing::error!(message = %first.message, "generated text does not validate");
            let err = SerializeError::Invalid(first.message.clone());
            self.transition(SyncState::Clean, "serialization failed");
            return Err(err.into());
        }

        self.source = serialized.source;
        self.ast = serialized.ast;
        self.model = next;
        self.diagnostics = diagnostics;
        self.revision += 1;
        self.applied_revision = self.revision;
        self.transition(SyncState::Clean, "text regenerated");
        Ok(())
    }

    pub fn select_scope(&mut self, scope: &Scope) -> Result<(), SyncError> {
        Ok(self.model.select_scope(scope)?)
    }

    pub fn select_layer(&mut self, scope: &Scope, layer: &str) -> Result<(), SyncError> {
        Ok(self.model.select_layer(scope, layer)?)
    }

    /// Re-resolve device scopes against a new device list.
    pub fn set_devices(&mut self, devices: Vec<DeviceInfo>) {
        self.devices = devices;
        rebind(&mut self.model, &self.devices);
        tracing::debug!(devices = self.devices.len(), "device list updated");
    }

    pub fn refresh_devices(&mut self, registry: &dyn DeviceRegistry) -> Result<(), SyncError> {
        let devices = registry.list_devices()?;
        self.set_devices(devices);
        Ok(())
    }

    /// Persist the current text. Pending keystrokes are parsed first; blocking
    /// errors refuse the save. On failure nothing in memory changes.
    pub fn save(&mut self, store: &dyn ProfileStore, now: Instant) -> Result<(), SyncError> {
        let profile = self.profile.clone().ok_or(SyncError::NoProfile)?;
        self.flush();
        if self.diagnostics.has_blocking_errors() {
            let count = self.diagnostics.error_count();
            tracing::warn!(profile = %profile, errors = count, "save blocked");
            return Err(SyncError::SaveBlocked(count));
        }
        let hash = store.save_config(&profile, &self.source, &self.hash)?;
        self.hash = hash;
        self.saved_source = self.source.clone();
        self.last_saved = Some(now);
        Ok(())
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Last AST that parsed without blocking errors.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn visual_model(&self) -> &VisualModel {
        &self.model
    }

    pub fn diagnostics(&self) -> &DiagnosticSet {
        &self.diagnostics
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.diagnostics.has_blocking_errors()
    }

    /// Save is offered when a profile is open and nothing blocks it.
    pub fn can_save(&self) -> bool {
        self.profile.is_some() && !self.has_blocking_errors()
    }

    /// The text differs from what was last loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.source != self.saved_source
    }

    pub fn last_saved(&self) -> Option<Instant> {
        self.last_saved
    }

    pub fn next_error(&self, line: usize, column: usize) -> Option<&Diagnostic> {
        self.diagnostics.next_error(line, column)
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
